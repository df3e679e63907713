//! Protocol states, link roles and the transition table
//!
//! The table in [`TRANSITIONS`] is the single source of truth: a transition
//! is only legal from the state listed for it, and it always leads to the
//! state listed next to it.

use crate::error::LinkError;

/// Link role, fixed for the lifetime of a state machine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Role {
    /// Initiates synchronization by probing
    Primary,
    /// Answers the primary's SYNC probe
    Secondary,
}

/// Protocol states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolState {
    /// Not initialized; never re-entered afterwards
    Undefined,
    /// Waiting for a SYNC probe, initial state for secondary
    WaitingSync,
    /// Sending SYNC probes, initial state for primary
    SendingSync,
    /// Idle, waiting for the strobe of the next packet
    Idle,
    /// Discarding bytes after a header error until a strobe shows up
    ScanStrobe,
    /// Waiting for the SYNC reply to be sent
    WriteSyncReply,
    /// Waiting for the rest of a SYNC probe
    ReadSyncRest,
    /// Waiting for the rest of a SYNC reply
    ReadSyncRRest,
    /// Waiting for the rest of a header
    ReadHeader,
    /// Waiting for payload and payload CRC
    ReadPayload,
}

impl ProtocolState {
    /// Upper-case state name, as used in diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolState::Undefined => "UNDEFINED",
            ProtocolState::WaitingSync => "WAITING_SYNC",
            ProtocolState::SendingSync => "SENDING_SYNC",
            ProtocolState::Idle => "IDLE",
            ProtocolState::ScanStrobe => "SCAN_STROBE",
            ProtocolState::WriteSyncReply => "WRITE_SYNC_REPLY",
            ProtocolState::ReadSyncRest => "READ_SYNC_REST",
            ProtocolState::ReadSyncRRest => "READ_SYNC_R_REST",
            ProtocolState::ReadHeader => "READ_HEADER",
            ProtocolState::ReadPayload => "READ_PAYLOAD",
        }
    }

    /// Check if the link handshake is still in progress in this state
    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            ProtocolState::WaitingSync
                | ProtocolState::SendingSync
                | ProtocolState::WriteSyncReply
                | ProtocolState::ReadSyncRest
                | ProtocolState::ReadSyncRRest
        )
    }

    /// Check if this state scans for a strobe byte at the buffer head
    pub fn is_scanning(&self) -> bool {
        matches!(
            self,
            ProtocolState::WaitingSync
                | ProtocolState::SendingSync
                | ProtocolState::Idle
                | ProtocolState::ScanStrobe
        )
    }
}

/// Named transitions between protocol states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Transition {
    // Secondary handshake
    SyncStrobeRead,
    SyncRestRead,
    UnexpSyncRestW,
    UnexpSyncRestI,
    SyncReplySent,

    // Primary handshake
    SyncRStrobeRead,
    SyncRRestRead,
    UnexpSyncRRest,

    // Data frames
    StrobeRead,
    StrobeReadScan,
    HeaderRead,
    HeaderError,
    PayloadRead,
    PayloadError,

    // Initialization
    BePrimary,
    BeSecondary,
}

/// The transition table: `(transition, from, to)`
pub const TRANSITIONS: [(Transition, ProtocolState, ProtocolState); 16] = {
    use ProtocolState::*;
    use Transition::*;
    [
        (SyncStrobeRead, WaitingSync, ReadSyncRest),
        (SyncRestRead, ReadSyncRest, WriteSyncReply),
        (UnexpSyncRestW, ReadSyncRest, WaitingSync),
        (UnexpSyncRestI, ReadSyncRest, Idle),
        (SyncReplySent, WriteSyncReply, Idle),
        (SyncRStrobeRead, SendingSync, ReadSyncRRest),
        (SyncRRestRead, ReadSyncRRest, Idle),
        (UnexpSyncRRest, ReadSyncRRest, SendingSync),
        (StrobeRead, Idle, ReadHeader),
        (StrobeReadScan, ScanStrobe, ReadHeader),
        (HeaderRead, ReadHeader, ReadPayload),
        (HeaderError, ReadHeader, ScanStrobe),
        (PayloadRead, ReadPayload, Idle),
        (PayloadError, ReadPayload, Idle),
        (BePrimary, Undefined, SendingSync),
        (BeSecondary, Undefined, WaitingSync),
    ]
};

impl Transition {
    /// Snake-case transition name, as used in diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Transition::SyncStrobeRead => "sync_strobe_read",
            Transition::SyncRestRead => "sync_rest_read",
            Transition::UnexpSyncRestW => "unexp_sync_rest_w",
            Transition::UnexpSyncRestI => "unexp_sync_rest_i",
            Transition::SyncReplySent => "sync_reply_sent",
            Transition::SyncRStrobeRead => "sync_r_strobe_read",
            Transition::SyncRRestRead => "sync_r_rest_read",
            Transition::UnexpSyncRRest => "unexp_sync_r_rest",
            Transition::StrobeRead => "strobe_read",
            Transition::StrobeReadScan => "strobe_read_scan",
            Transition::HeaderRead => "header_read",
            Transition::HeaderError => "header_error",
            Transition::PayloadRead => "payload_read",
            Transition::PayloadError => "payload_error",
            Transition::BePrimary => "be_primary",
            Transition::BeSecondary => "be_secondary",
        }
    }

    /// Source and target state of this transition
    pub fn edge(&self) -> (ProtocolState, ProtocolState) {
        // Every transition has exactly one table row
        TRANSITIONS
            .iter()
            .find(|(transition, _, _)| transition == self)
            .map(|&(_, from, to)| (from, to))
            .unwrap_or((ProtocolState::Undefined, ProtocolState::Undefined))
    }

    /// Apply this transition to `state`
    ///
    /// Returns the target state, or [`LinkError::InvalidTransition`] if the
    /// table has no row for this transition leaving `state`.
    pub fn apply(self, state: ProtocolState) -> Result<ProtocolState, LinkError> {
        match self.edge() {
            (from, to) if from == state => Ok(to),
            _ => Err(LinkError::InvalidTransition {
                transition: self,
                from: state,
            }),
        }
    }

    /// Initialization transition for a role
    pub fn init_for(role: Role) -> Self {
        match role {
            Role::Primary => Transition::BePrimary,
            Role::Secondary => Transition::BeSecondary,
        }
    }
}
