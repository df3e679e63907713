//! Strobelink Hardware Abstraction Layer
//!
//! Serial transport traits used by the link driver. Chip-specific HALs (or
//! anything speaking `embedded-io`) implement them so the same link code
//! runs on every platform.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  strobelink-link (driver)               │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  strobelink-hal (this crate - traits)   │
//! └─────────────────────────────────────────┘
//!                     │
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │  chip HAL     │       │  IoSerial     │
//! │  UART         │       │ (embedded-io) │
//! └───────────────┘       └───────────────┘
//! ```

#![no_std]
#![deny(unsafe_code)]

pub mod serial;

pub use serial::{
    DataBits, IoSerial, Parity, Serial, SerialConfig, SerialError, SerialRx, SerialTx, StopBits,
};
