//! Link errors
//!
//! Byte-level corruption (CRC mismatches, oversized or unexpected headers)
//! is recovered from inside the state machine and only reported through
//! [`Outcome::recovered`](crate::Outcome::recovered). Errors returned as
//! `Err` from the state machine are the ones the caller has to act on.

use crate::frame::{FrameError, HeaderKind};
use crate::state::{ProtocolState, Transition};

/// Errors reported by the link state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// Transition not in the table for the current state; state unchanged
    InvalidTransition {
        transition: Transition,
        from: ProtocolState,
    },
    /// Header CRC mismatch; recovered by scanning for the next strobe
    HeaderCrcMismatch { expected: u16, computed: u16 },
    /// Payload CRC mismatch; the packet was dropped
    PayloadCrcMismatch {
        packet_id: u16,
        expected: u16,
        computed: u16,
    },
    /// Header declared a payload above the allowed maximum; handled like a
    /// header CRC mismatch
    OversizedFrame { length: u16, max: u16 },
    /// Control frame received where a data header was expected
    UnexpectedControlFrame { kind: HeaderKind },
    /// Payload handed to the sender exceeds the allowed maximum
    PayloadTooLarge { length: usize, max: usize },
    /// Payload sent before the handshake completed
    NotSynced,
    /// Receive buffer full; incoming bytes were dropped
    BufferOverflow { dropped: usize },
    /// Codec error outside the link taxonomy
    Codec(FrameError),
    /// Instance is in (or back to) the undefined state and must be replaced
    UnrecoverableFault,
}

impl LinkError {
    /// Check if this error was handled by resynchronizing
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LinkError::HeaderCrcMismatch { .. }
                | LinkError::PayloadCrcMismatch { .. }
                | LinkError::OversizedFrame { .. }
                | LinkError::UnexpectedControlFrame { .. }
                | LinkError::BufferOverflow { .. }
        )
    }
}

impl From<FrameError> for LinkError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::HeaderCrcMismatch { expected, computed } => {
                LinkError::HeaderCrcMismatch { expected, computed }
            }
            FrameError::OversizedFrame { length, max } => LinkError::OversizedFrame { length, max },
            FrameError::PayloadTooLarge { length, max } => {
                LinkError::PayloadTooLarge { length, max }
            }
            other => LinkError::Codec(other),
        }
    }
}
