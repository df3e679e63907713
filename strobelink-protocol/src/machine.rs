//! Link state machine
//!
//! [`LinkStateMachine`] owns the receive buffer, the role, the sync flag and
//! the sequence counter of one link session. It never performs I/O: received
//! bytes go in through [`LinkStateMachine::on_bytes_received`], and packets
//! to transmit come out in the returned [`Outcome`].

use alloc::vec::Vec;

use crate::buffer::ReceiveBuffer;
use crate::checksum::crc16;
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::frame::{
    decode_header, Frame, FrameError, HeaderKind, Packet, PacketHeader, Payload, HEADER_SIZE,
    MAX_PAYLOAD_SIZE, STROBE,
};
use crate::handshake::SyncTimer;
use crate::observer::{NoopObserver, TransitionObserver};
use crate::state::{ProtocolState, Role, Transition};

/// Result of feeding bytes or timer ticks into the state machine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Packets to write to the transport, in order
    pub outgoing: Vec<Packet>,
    /// Validated payloads for the application, in order
    pub delivered: Vec<Payload>,
    /// Corruption handled internally (advisory)
    pub recovered: Vec<LinkError>,
}

impl Outcome {
    /// Check if nothing was produced
    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty() && self.delivered.is_empty() && self.recovered.is_empty()
    }

    /// Append another outcome after this one
    pub fn merge(&mut self, other: Outcome) {
        self.outgoing.extend(other.outgoing);
        self.delivered.extend(other.delivered);
        self.recovered.extend(other.recovered);
    }
}

/// Link counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkStats {
    /// Data frames delivered upward
    pub frames_received: u32,
    /// Data frames encoded by `send_payload`
    pub frames_sent: u32,
    /// Headers rejected (CRC, size, unexpected control frame)
    pub header_errors: u32,
    /// Payloads dropped on CRC mismatch
    pub payload_errors: u32,
    /// Non-strobe bytes skipped while scanning
    pub bytes_discarded: u32,
    /// SYNC probes emitted
    pub sync_probes_sent: u32,
    /// Bytes dropped because the receive buffer was full
    pub bytes_overflowed: u32,
}

/// What the state machine is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Operation {
    /// Not initialized
    Nope,
    /// Waiting for a strobe or for the rest of a header
    ReadHeader,
    /// Waiting for payload and payload CRC
    ReadPayload,
    /// Waiting for the caller to confirm the SYNC reply was sent
    SendSyncReply,
}

/// Next read the transport should perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NextOperation {
    pub operation: Operation,
    /// Bytes still missing before the machine can advance
    pub bytes_to_read: usize,
    /// Packet id of the payload being read, 0 otherwise
    pub packet_id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Advanced,
    Blocked,
}

/// Packet id following `id`; 0 is reserved, so the sequence wraps to 1
pub(crate) fn following_packet_id(id: u16) -> u16 {
    match id.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}

pub(crate) fn bump(counter: &mut u32) {
    *counter = counter.saturating_add(1);
}

/// Protocol state machine for one end of a link
pub struct LinkStateMachine<O = NoopObserver> {
    pub(crate) config: LinkConfig,
    pub(crate) state: ProtocolState,
    pub(crate) role: Option<Role>,
    pub(crate) synced: bool,
    /// Last packet id handed out
    pub(crate) sequence_id: u16,
    pub(crate) buffer: ReceiveBuffer,
    pub(crate) pending: Option<PacketHeader>,
    pub(crate) sync_timer: SyncTimer,
    pub(crate) stats: LinkStats,
    observer: O,
}

impl LinkStateMachine<NoopObserver> {
    /// Create an uninitialized state machine
    pub fn new(config: LinkConfig) -> Self {
        Self::with_observer(config, NoopObserver)
    }
}

impl<O: TransitionObserver> LinkStateMachine<O> {
    /// Create an uninitialized state machine reporting to `observer`
    pub fn with_observer(config: LinkConfig, observer: O) -> Self {
        Self {
            config,
            state: ProtocolState::Undefined,
            role: None,
            synced: false,
            sequence_id: 0,
            buffer: ReceiveBuffer::new(),
            pending: None,
            sync_timer: SyncTimer::from_config(&config),
            stats: LinkStats::default(),
            observer,
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// Role chosen by [`initialize`](Self::initialize)
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Check if a SYNC exchange has completed
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Number of received bytes not yet consumed
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Header of the frame whose payload is being read
    pub fn pending_header(&self) -> Option<&PacketHeader> {
        self.pending.as_ref()
    }

    /// Received bytes not yet turned into a packet, in arrival order
    ///
    /// Includes the header of a frame whose payload is still incomplete, so
    /// feeding the result to a fresh machine parses the same frames.
    pub fn unparsed(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.buffer.len());
        if self.state == ProtocolState::ReadPayload {
            if let Some(header) = &self.pending {
                bytes.extend_from_slice(&header.to_bytes());
            }
        }
        bytes.extend_from_slice(self.buffer.unread());
        bytes
    }

    /// Packet id the next `send_payload` will use
    pub fn next_packet_id(&self) -> u16 {
        following_packet_id(self.sequence_id)
    }

    /// Enter the role's initial state
    ///
    /// A primary starts probing right away: its first SYNC probe is in the
    /// returned outcome. Fails with [`LinkError::InvalidTransition`] if the
    /// machine was already initialized.
    pub fn initialize(&mut self, role: Role) -> Result<Outcome, LinkError> {
        self.fire(Transition::init_for(role))?;
        self.role = Some(role);

        let mut outcome = Outcome::default();
        if role == Role::Primary {
            self.sync_timer.reset();
            self.emit_sync_probe(&mut outcome);
        }
        Ok(outcome)
    }

    /// Buffer received bytes and advance as far as they allow
    ///
    /// Corrupted or misaligned data is handled by resynchronizing and shows
    /// up in [`Outcome::recovered`]; `Err` is only returned when the machine
    /// was never initialized.
    pub fn on_bytes_received(&mut self, bytes: &[u8]) -> Result<Outcome, LinkError> {
        self.ensure_initialized()?;

        let mut outcome = Outcome::default();
        let mut rest = bytes;
        loop {
            let accepted = self.buffer.push(rest);
            rest = &rest[accepted..];

            self.process(&mut outcome)?;

            if rest.is_empty() {
                break;
            }
            if accepted == 0 && self.buffer.free() == 0 {
                // Nothing left to parse out of a full buffer (awaiting SYNC reply confirmation)
                self.stats.bytes_overflowed =
                    self.stats.bytes_overflowed.saturating_add(rest.len() as u32);
                outcome
                    .recovered
                    .push(LinkError::BufferOverflow { dropped: rest.len() });
                break;
            }
        }

        Ok(outcome)
    }

    /// Encode a data frame carrying `payload` with the next packet id
    pub fn send_payload(&mut self, payload: &[u8]) -> Result<Packet, LinkError> {
        if !self.synced {
            return Err(LinkError::NotSynced);
        }

        let limit = self.config.payload_limit() as usize;
        if payload.len() > limit {
            return Err(LinkError::PayloadTooLarge {
                length: payload.len(),
                max: limit,
            });
        }

        self.sequence_id = following_packet_id(self.sequence_id);
        let packet = Frame::new(self.sequence_id, payload)?.encode_to_vec()?;
        bump(&mut self.stats.frames_sent);
        Ok(packet)
    }

    /// Describe what the machine needs next from the transport
    pub fn next_operation(&self) -> NextOperation {
        let buffered = self.buffer.len();
        let (operation, bytes_to_read, packet_id) = match self.state {
            ProtocolState::Undefined => (Operation::Nope, 0, 0),
            ProtocolState::WaitingSync
            | ProtocolState::SendingSync
            | ProtocolState::Idle
            | ProtocolState::ScanStrobe => (Operation::ReadHeader, 1, 0),
            ProtocolState::ReadSyncRest | ProtocolState::ReadSyncRRest | ProtocolState::ReadHeader => {
                (Operation::ReadHeader, HEADER_SIZE.saturating_sub(buffered), 0)
            }
            ProtocolState::ReadPayload => match self.pending {
                Some(header) => (
                    Operation::ReadPayload,
                    header.body_len().saturating_sub(buffered),
                    header.packet_id,
                ),
                None => (Operation::Nope, 0, 0),
            },
            ProtocolState::WriteSyncReply => (Operation::SendSyncReply, 0, 0),
        };

        NextOperation {
            operation,
            bytes_to_read,
            packet_id,
        }
    }

    pub(crate) fn ensure_initialized(&self) -> Result<(), LinkError> {
        if self.state == ProtocolState::Undefined {
            return Err(LinkError::UnrecoverableFault);
        }
        Ok(())
    }

    /// Take a transition, checked against the table
    pub(crate) fn fire(&mut self, transition: Transition) -> Result<(), LinkError> {
        let from = self.state;
        match transition.apply(from) {
            Ok(to) => {
                self.state = to;
                self.observer.record(transition, from, to);
                Ok(())
            }
            Err(e) => {
                self.observer.rejected(transition, from);
                Err(e)
            }
        }
    }

    /// Advance until the buffered bytes are exhausted for the current state
    pub(crate) fn process(&mut self, outcome: &mut Outcome) -> Result<(), LinkError> {
        while self.step(outcome)? == Step::Advanced {}
        Ok(())
    }

    fn step(&mut self, outcome: &mut Outcome) -> Result<Step, LinkError> {
        match self.state {
            ProtocolState::Undefined => Err(LinkError::UnrecoverableFault),
            ProtocolState::WaitingSync => self.scan_strobe(Transition::SyncStrobeRead),
            ProtocolState::SendingSync => self.scan_strobe(Transition::SyncRStrobeRead),
            ProtocolState::Idle => self.scan_strobe(Transition::StrobeRead),
            ProtocolState::ScanStrobe => self.scan_strobe(Transition::StrobeReadScan),
            ProtocolState::ReadSyncRest => self.read_sync_rest(outcome),
            ProtocolState::ReadSyncRRest => self.read_sync_reply_rest(outcome),
            ProtocolState::WriteSyncReply => Ok(Step::Blocked),
            ProtocolState::ReadHeader => self.read_header(outcome),
            ProtocolState::ReadPayload => self.read_payload(outcome),
        }
    }

    /// Skip non-strobe bytes; on a strobe take `on_strobe`, leaving the
    /// strobe in place so the header is parsed from it
    fn scan_strobe(&mut self, on_strobe: Transition) -> Result<Step, LinkError> {
        match self.buffer.head() {
            None => Ok(Step::Blocked),
            Some(STROBE) => {
                self.pending = None;
                self.fire(on_strobe)?;
                Ok(Step::Advanced)
            }
            Some(_) => {
                self.buffer.discard_head();
                bump(&mut self.stats.bytes_discarded);
                Ok(Step::Advanced)
            }
        }
    }

    fn read_header(&mut self, outcome: &mut Outcome) -> Result<Step, LinkError> {
        let decoded = match self.buffer.peek(HEADER_SIZE) {
            Some(bytes) => decode_header(bytes, self.config.payload_limit()),
            None => return Ok(Step::Blocked),
        };

        match decoded {
            Ok(header) if header.kind() == HeaderKind::Data => {
                self.buffer.consume(HEADER_SIZE);
                self.pending = Some(header);
                self.fire(Transition::HeaderRead)?;
            }
            Ok(header) => {
                self.drop_strobe(LinkError::UnexpectedControlFrame { kind: header.kind() }, outcome);
                self.fire(Transition::HeaderError)?;
            }
            Err(e) => {
                self.drop_strobe(e.into(), outcome);
                self.fire(Transition::HeaderError)?;
            }
        }

        Ok(Step::Advanced)
    }

    fn read_payload(&mut self, outcome: &mut Outcome) -> Result<Step, LinkError> {
        let header = self.pending.ok_or(LinkError::UnrecoverableFault)?;
        let payload_len = header.payload_len as usize;

        let (payload, expected, computed) = match self.buffer.peek(header.body_len()) {
            Some(body) => {
                let payload = &body[..payload_len];
                let expected = u16::from_be_bytes([body[payload_len], body[payload_len + 1]]);
                let payload = Payload::from_slice(payload).map_err(|_| {
                    FrameError::PayloadTooLarge {
                        length: payload_len,
                        max: MAX_PAYLOAD_SIZE,
                    }
                })?;
                let computed = crc16(&payload);
                (payload, expected, computed)
            }
            None => return Ok(Step::Blocked),
        };

        self.buffer.consume(header.body_len());
        self.pending = None;

        if expected == computed {
            outcome.delivered.push(payload);
            bump(&mut self.stats.frames_received);
            self.fire(Transition::PayloadRead)?;
        } else {
            outcome.recovered.push(LinkError::PayloadCrcMismatch {
                packet_id: header.packet_id,
                expected,
                computed,
            });
            bump(&mut self.stats.payload_errors);
            self.fire(Transition::PayloadError)?;
        }

        Ok(Step::Advanced)
    }

    /// Reject the header at the buffer head: drop its strobe byte so the
    /// scan restarts from the byte after it
    pub(crate) fn drop_strobe(&mut self, error: LinkError, outcome: &mut Outcome) {
        self.buffer.consume(1);
        bump(&mut self.stats.header_errors);
        outcome.recovered.push(error);
    }
}
