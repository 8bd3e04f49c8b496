//! Stocktake scanning domain.
//!
//! Business rules for barcode-driven stock taking, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage, no clocks: every
//! timestamp is passed in by the caller).

pub mod decoder;
pub mod report;
pub mod session;
pub mod submission;
pub mod supplier;

pub use decoder::{DecoderConfig, Key, KeyEvent, KeyOrigin, ScanDecoder};
pub use report::{
    Progression, ProgressionConfig, ScanRecord, ScanRecordStatus, SessionReport, format_duration,
};
pub use session::{
    EndSync, ScanSession, Session, SessionCommand, SessionEvent, SessionSnapshot, SessionStatus,
};
pub use submission::{
    Barcode, MIN_BARCODE_LEN, ScanClassification, ScanResult, ScanSubmission, validate_note,
};
pub use supplier::{MaterialScan, SupplierContext};
