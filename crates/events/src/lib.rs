//! Domain events and the live activity feed.
//!
//! - [`Event`] / [`execute`]: the decide-then-apply lifecycle shared by domain aggregates.
//! - [`Projection`]: read models folded from event streams.
//! - [`activity`]: wire types, connection state and bounded history of the activity feed.
//! - [`sse`]: incremental decoder for `text/event-stream` bodies.

pub mod activity;
pub mod event;
pub mod handler;
pub mod projection;
pub mod sse;

pub use activity::{
    ActivityEvent, ActivityHistory, ConnectionState, DEFAULT_HISTORY_CAPACITY, ScanActivity,
};
pub use event::Event;
pub use handler::execute;
pub use projection::Projection;
pub use sse::{MAX_FRAME_BYTES, SseDecoder, SseError, SseFrame};
