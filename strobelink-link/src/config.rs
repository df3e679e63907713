//! Link settings
//!
//! Settings are read from a TOML document such as:
//!
//! ```toml
//! role = "secondary"
//! resync_on_probe = true
//!
//! [serial]
//! baudrate = 115200
//! parity = "none"
//!
//! [protocol]
//! sync_retry_ms = 500
//! max_payload_len = 255
//! ```
//!
//! Everything except `role` falls back to its default.

use serde::Deserialize;

use strobelink_hal::SerialConfig;
use strobelink_protocol::{LinkConfig, Role, HEADER_SIZE, MAX_PAYLOAD_SIZE};

/// Settings errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// TOML parsing failed
    TomlParse,
    /// Baud rate must be non-zero
    InvalidBaudrate,
    /// SYNC retry interval must be non-zero and longer than a SYNC round trip
    InvalidRetryInterval,
    /// Payload limit above the wire maximum
    InvalidPayloadLength { max_payload_len: u16 },
}

/// Settings for one end of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkSettings {
    /// Which end of the link this is
    pub role: Role,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub protocol: LinkConfig,
    /// Restart the session when a synced secondary sees a new SYNC probe
    #[serde(default = "default_resync_on_probe")]
    pub resync_on_probe: bool,
}

fn default_resync_on_probe() -> bool {
    true
}

impl LinkSettings {
    /// Default settings for `role`
    pub fn new(role: Role) -> Self {
        Self {
            role,
            serial: SerialConfig::default(),
            protocol: LinkConfig::default(),
            resync_on_probe: default_resync_on_probe(),
        }
    }

    /// Wire time of a SYNC probe and its reply at the configured line rate
    pub fn sync_round_trip_us(&self) -> u64 {
        self.serial.transfer_time_us(2 * HEADER_SIZE)
    }

    /// Check values the type system cannot
    ///
    /// The SYNC retry interval has to outlast a probe and its reply on the
    /// wire, otherwise every reply races a retry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.baudrate == 0 {
            return Err(ConfigError::InvalidBaudrate);
        }
        let retry_us = u64::from(self.protocol.sync_retry_ms) * 1000;
        if retry_us == 0 || retry_us <= self.sync_round_trip_us() {
            return Err(ConfigError::InvalidRetryInterval);
        }
        if self.protocol.max_payload_len as usize > MAX_PAYLOAD_SIZE {
            return Err(ConfigError::InvalidPayloadLength {
                max_payload_len: self.protocol.max_payload_len,
            });
        }
        Ok(())
    }
}

/// Parse and validate link settings from TOML
pub fn parse_settings(input: &str) -> Result<LinkSettings, ConfigError> {
    let settings: LinkSettings = toml::from_str(input).map_err(toml_error)?;
    settings.validate()?;

    #[cfg(feature = "defmt")]
    defmt::debug!(
        "link settings: role={} baudrate={} retry={}ms",
        settings.role,
        settings.serial.baudrate,
        settings.protocol.sync_retry_ms
    );

    Ok(settings)
}

fn toml_error(e: toml::de::Error) -> ConfigError {
    #[cfg(feature = "defmt")]
    defmt::warn!("TOML parse error: {:?}", defmt::Debug2Format(&e));
    #[cfg(not(feature = "defmt"))]
    let _ = e;
    ConfigError::TomlParse
}

#[cfg(test)]
mod tests {
    use super::*;
    use strobelink_hal::serial::{Parity, StopBits};

    #[test]
    fn test_minimal_settings() {
        let settings = parse_settings("role = \"primary\"").unwrap();
        assert_eq!(settings, LinkSettings::new(Role::Primary));
        assert!(settings.resync_on_probe);
        assert_eq!(settings.serial.baudrate, 115200);
        assert_eq!(settings.protocol.sync_retry_ms, 500);
    }

    #[test]
    fn test_full_settings() {
        let input = r#"
            # secondary end of the link
            role = "secondary"
            resync_on_probe = false

            [serial]
            baudrate = 9600
            parity = "even"
            stop_bits = "two"

            [protocol]
            sync_retry_ms = 250
            max_payload_len = 64
            auto_confirm_sync_reply = false
        "#;

        let settings = parse_settings(input).unwrap();
        assert_eq!(settings.role, Role::Secondary);
        assert!(!settings.resync_on_probe);
        assert_eq!(settings.serial.baudrate, 9600);
        assert_eq!(settings.serial.parity, Parity::Even);
        assert_eq!(settings.serial.stop_bits, StopBits::Two);
        assert_eq!(settings.protocol.sync_retry_ms, 250);
        assert_eq!(settings.protocol.max_payload_len, 64);
        assert!(!settings.protocol.auto_confirm_sync_reply);
    }

    #[test]
    fn test_missing_role() {
        assert_eq!(parse_settings("[serial]\nbaudrate = 9600"), Err(ConfigError::TomlParse));
    }

    #[test]
    fn test_malformed_toml() {
        assert_eq!(parse_settings("role = "), Err(ConfigError::TomlParse));
        assert_eq!(parse_settings("role = \"tertiary\""), Err(ConfigError::TomlParse));
    }

    #[test]
    fn test_retry_must_outlast_sync_round_trip() {
        let mut settings = LinkSettings::new(Role::Primary);
        settings.serial.baudrate = 300;
        // 14 bytes of 10 bits at 300 baud
        assert_eq!(settings.sync_round_trip_us(), 466_666);

        settings.protocol.sync_retry_ms = 400;
        assert_eq!(settings.validate(), Err(ConfigError::InvalidRetryInterval));
        settings.protocol.sync_retry_ms = 500;
        assert_eq!(settings.validate(), Ok(()));

        assert_eq!(
            parse_settings("role = \"primary\"\n[serial]\nbaudrate = 300\n[protocol]\nsync_retry_ms = 100"),
            Err(ConfigError::InvalidRetryInterval)
        );
    }

    #[test]
    fn test_validation() {
        assert_eq!(
            parse_settings("role = \"primary\"\n[serial]\nbaudrate = 0"),
            Err(ConfigError::InvalidBaudrate)
        );
        assert_eq!(
            parse_settings("role = \"primary\"\n[protocol]\nsync_retry_ms = 0"),
            Err(ConfigError::InvalidRetryInterval)
        );
        assert_eq!(
            parse_settings("role = \"primary\"\n[protocol]\nmax_payload_len = 300"),
            Err(ConfigError::InvalidPayloadLength {
                max_payload_len: 300
            })
        );
    }
}
