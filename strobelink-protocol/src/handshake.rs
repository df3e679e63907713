//! Link synchronization
//!
//! The primary repeats a SYNC probe every `sync_retry_ms` until it receives
//! a SYNC reply. The secondary answers the first valid probe with a reply
//! and considers itself synced once that reply is sent. If the secondary
//! sees a valid data header instead, the primary is already past the
//! handshake and the secondary joins it.

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::frame::{
    decode_header, encode_sync_probe, encode_sync_reply, HeaderKind, Packet, HEADER_SIZE,
};
use crate::machine::{bump, LinkStateMachine, Outcome, Step};
use crate::observer::TransitionObserver;
use crate::state::{ProtocolState, Transition};

/// Elapsed-time accumulator driving SYNC probe retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SyncTimer {
    interval_ms: u32,
    elapsed_ms: u32,
}

impl SyncTimer {
    pub const fn new(interval_ms: u32) -> Self {
        Self {
            interval_ms,
            elapsed_ms: 0,
        }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(config.sync_retry_ms)
    }

    pub fn reset(&mut self) {
        self.elapsed_ms = 0;
    }

    pub fn elapsed_ms(&self) -> u32 {
        self.elapsed_ms
    }

    /// Add `delta_ms`; returns true (and restarts) once the interval is reached
    pub fn advance(&mut self, delta_ms: u32) -> bool {
        self.elapsed_ms = self.elapsed_ms.saturating_add(delta_ms);
        if self.elapsed_ms >= self.interval_ms {
            self.elapsed_ms = 0;
            true
        } else {
            false
        }
    }
}

fn control_packet(header: [u8; HEADER_SIZE]) -> Packet {
    let mut packet = Packet::new();
    // Header always fits in a packet
    let _ = packet.extend_from_slice(&header);
    packet
}

impl<O: TransitionObserver> LinkStateMachine<O> {
    /// Report elapsed time
    ///
    /// While a primary is waiting for the SYNC reply, a probe is repeated
    /// each time `sync_retry_ms` has accumulated. In any other situation
    /// this is a no-op.
    pub fn on_timer_tick(&mut self, elapsed_ms: u32) -> Result<Outcome, LinkError> {
        self.ensure_initialized()?;

        let mut outcome = Outcome::default();
        let probing = !self.synced
            && matches!(
                self.state,
                ProtocolState::SendingSync | ProtocolState::ReadSyncRRest
            );
        if probing && self.sync_timer.advance(elapsed_ms) {
            self.emit_sync_probe(&mut outcome);
        }
        Ok(outcome)
    }

    /// Confirm that the SYNC reply went out
    ///
    /// Only needed when `auto_confirm_sync_reply` is off. Bytes buffered
    /// while waiting are processed before returning.
    pub fn sync_reply_sent(&mut self) -> Result<Outcome, LinkError> {
        self.fire(Transition::SyncReplySent)?;
        self.synced = true;

        let mut outcome = Outcome::default();
        self.process(&mut outcome)?;
        Ok(outcome)
    }

    pub(crate) fn emit_sync_probe(&mut self, outcome: &mut Outcome) {
        outcome.outgoing.push(control_packet(encode_sync_probe()));
        bump(&mut self.stats.sync_probes_sent);
    }

    /// Secondary: a strobe arrived while waiting for a SYNC probe
    pub(crate) fn read_sync_rest(&mut self, outcome: &mut Outcome) -> Result<Step, LinkError> {
        let decoded = match self.buffer.peek(HEADER_SIZE) {
            Some(bytes) => decode_header(bytes, self.config.payload_limit()),
            None => return Ok(Step::Blocked),
        };

        match decoded {
            Ok(header) if header.kind() == HeaderKind::SyncProbe => {
                self.buffer.consume(HEADER_SIZE);
                self.fire(Transition::SyncRestRead)?;
                outcome.outgoing.push(control_packet(encode_sync_reply()));
                if self.config.auto_confirm_sync_reply {
                    self.fire(Transition::SyncReplySent)?;
                    self.synced = true;
                }
            }
            Ok(header) if header.kind() == HeaderKind::Data => {
                // Left in the buffer, parsed again from IDLE
                self.fire(Transition::UnexpSyncRestI)?;
                self.synced = true;
            }
            Ok(header) => {
                self.drop_strobe(LinkError::UnexpectedControlFrame { kind: header.kind() }, outcome);
                self.fire(Transition::UnexpSyncRestW)?;
            }
            Err(e) => {
                self.drop_strobe(e.into(), outcome);
                self.fire(Transition::UnexpSyncRestW)?;
            }
        }

        Ok(Step::Advanced)
    }

    /// Primary: a strobe arrived while waiting for the SYNC reply
    pub(crate) fn read_sync_reply_rest(&mut self, outcome: &mut Outcome) -> Result<Step, LinkError> {
        let decoded = match self.buffer.peek(HEADER_SIZE) {
            Some(bytes) => decode_header(bytes, self.config.payload_limit()),
            None => return Ok(Step::Blocked),
        };

        match decoded {
            Ok(header) if header.kind() == HeaderKind::SyncReply => {
                self.buffer.consume(HEADER_SIZE);
                self.fire(Transition::SyncRRestRead)?;
                self.synced = true;
                self.sync_timer.reset();
            }
            Ok(header) => {
                self.drop_strobe(LinkError::UnexpectedControlFrame { kind: header.kind() }, outcome);
                self.fire(Transition::UnexpSyncRRest)?;
            }
            Err(e) => {
                self.drop_strobe(e.into(), outcome);
                self.fire(Transition::UnexpSyncRRest)?;
            }
        }

        Ok(Step::Advanced)
    }
}
