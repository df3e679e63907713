//! Transition observers
//!
//! Every fired transition is reported as a `(transition, from, to)` event;
//! every rejected one as `(transition, from)`. Observers are advisory and
//! cannot influence the state machine.

use crate::state::{ProtocolState, Transition};

/// Receiver of structured transition events
pub trait TransitionObserver {
    /// A transition was taken
    fn record(&mut self, transition: Transition, from: ProtocolState, to: ProtocolState);

    /// A transition was refused because the table has no such edge
    fn rejected(&mut self, _transition: Transition, _from: ProtocolState) {}
}

/// Observer that ignores all events
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl TransitionObserver for NoopObserver {
    fn record(&mut self, _transition: Transition, _from: ProtocolState, _to: ProtocolState) {}
}

impl<T: TransitionObserver + ?Sized> TransitionObserver for &mut T {
    fn record(&mut self, transition: Transition, from: ProtocolState, to: ProtocolState) {
        (**self).record(transition, from, to);
    }

    fn rejected(&mut self, transition: Transition, from: ProtocolState) {
        (**self).rejected(transition, from);
    }
}

/// Observer that logs transitions through defmt
#[cfg(feature = "defmt")]
#[derive(Debug, Clone, Copy, Default)]
pub struct DefmtObserver;

#[cfg(feature = "defmt")]
impl TransitionObserver for DefmtObserver {
    fn record(&mut self, transition: Transition, from: ProtocolState, to: ProtocolState) {
        defmt::debug!(
            "link transition <{}> from <{}> to <{}>",
            transition.name(),
            from.name(),
            to.name()
        );
    }

    fn rejected(&mut self, transition: Transition, from: ProtocolState) {
        defmt::warn!(
            "link transition <{}> rejected in <{}>",
            transition.name(),
            from.name()
        );
    }
}
