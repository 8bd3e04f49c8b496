/// A projection builds a read model from a stream of events.
///
/// Projections are disposable: they can be reset and rebuilt from whatever
/// events arrive next. They never fail; events a projection does not care
/// about are ignored.
pub trait Projection {
    type Ev;

    /// Fold a single event into the read model.
    fn apply(&mut self, event: &Self::Ev);

    /// Drop all accumulated state.
    fn reset(&mut self);
}
