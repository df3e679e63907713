//! Link configuration

use crate::frame::MAX_PAYLOAD_SIZE;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default interval between SYNC probes
pub const DEFAULT_SYNC_RETRY_MS: u32 = 500;

/// Tunable link parameters
///
/// Both ends of a link must agree on `max_payload_len`; the other fields
/// are local.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LinkConfig {
    /// Interval between SYNC probes while unsynchronized (ms)
    pub sync_retry_ms: u32,
    /// Largest payload accepted or sent (at most 255)
    pub max_payload_len: u16,
    /// Leave WRITE_SYNC_REPLY as soon as the reply is queued
    ///
    /// When false the caller confirms transmission with
    /// [`LinkStateMachine::sync_reply_sent`](crate::LinkStateMachine::sync_reply_sent).
    pub auto_confirm_sync_reply: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            sync_retry_ms: DEFAULT_SYNC_RETRY_MS,
            max_payload_len: MAX_PAYLOAD_SIZE as u16,
            auto_confirm_sync_reply: true,
        }
    }
}

impl LinkConfig {
    /// Set the SYNC probe interval
    pub fn with_sync_retry_ms(mut self, sync_retry_ms: u32) -> Self {
        self.sync_retry_ms = sync_retry_ms;
        self
    }

    /// Set the maximum payload length, clamped to [`MAX_PAYLOAD_SIZE`]
    pub fn with_max_payload_len(mut self, max_payload_len: u16) -> Self {
        self.max_payload_len = max_payload_len.min(MAX_PAYLOAD_SIZE as u16);
        self
    }

    /// Require an explicit `sync_reply_sent` call after the SYNC reply
    pub fn with_manual_sync_reply(mut self) -> Self {
        self.auto_confirm_sync_reply = false;
        self
    }

    /// Effective payload limit, never above [`MAX_PAYLOAD_SIZE`]
    pub fn payload_limit(&self) -> u16 {
        self.max_payload_len.min(MAX_PAYLOAD_SIZE as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.sync_retry_ms, 500);
        assert_eq!(config.max_payload_len, 255);
        assert!(config.auto_confirm_sync_reply);
    }

    #[test]
    fn test_max_payload_clamped() {
        let config = LinkConfig::default().with_max_payload_len(1000);
        assert_eq!(config.max_payload_len, 255);

        let config = LinkConfig::default().with_max_payload_len(64);
        assert_eq!(config.payload_limit(), 64);
    }

    #[test]
    fn test_payload_limit_ignores_out_of_range_field() {
        let config = LinkConfig {
            max_payload_len: 4000,
            ..LinkConfig::default()
        };
        assert_eq!(config.payload_limit(), 255);
    }
}
