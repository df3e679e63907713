//! Strobelink serial link
//!
//! Glue between a serial port and the protocol state machine:
//!
//! - [`config`] - link settings loaded from TOML
//! - [`driver`] - [`LinkDriver`], which reads the port, writes outgoing
//!   packets and ticks the SYNC retry timer
//!
//! ```ignore
//! let settings = parse_settings(SETTINGS_TOML)?;
//! let mut link = LinkDriver::start(IoSerial::new(tx), IoSerial::new(rx), settings)?;
//! loop {
//!     for payload in link.poll(elapsed_ms)? {
//!         handle(&payload);
//!     }
//! }
//! ```

#![no_std]
#![deny(unsafe_code)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod config;
pub mod driver;

pub use config::{parse_settings, ConfigError, LinkSettings};
pub use driver::{DriverError, LinkDriver, MAX_CHUNKS_PER_POLL, RX_CHUNK_SIZE};
