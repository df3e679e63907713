//! Strobelink half-duplex link protocol
//!
//! This crate implements the link layer between a *primary* initiator and a
//! *secondary* responder sharing an unreliable byte stream (typically a
//! UART). It covers link synchronization, framing and corruption recovery;
//! the transport, the timer source and the meaning of payload bytes are left
//! to the caller.
//!
//! # Frame Format
//!
//! ```text
//! ┌────────┬─────────┬─────────┬────────────┬─────────────┬─────────────┐
//! │ STROBE │ ID      │ LENGTH  │ HEADER CRC │ PAYLOAD     │ PAYLOAD CRC │
//! │ 1B     │ 2B (BE) │ 2B (BE) │ 2B (BE)    │ 0–255B      │ 2B (BE)     │
//! └────────┴─────────┴─────────┴────────────┴─────────────┴─────────────┘
//! ```
//!
//! Packet id 0 is reserved for the header-only SYNC probe and SYNC reply
//! frames exchanged once per session.
//!
//! # Usage
//!
//! The caller owns the transport and feeds every received chunk into
//! [`LinkStateMachine::on_bytes_received`], writes every packet of
//! [`Outcome::outgoing`] to the wire, and calls
//! [`LinkStateMachine::on_timer_tick`] periodically so an unanswered SYNC
//! probe gets repeated.

#![no_std]
#![deny(unsafe_code)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod buffer;
pub mod checksum;
pub mod config;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod machine;
pub mod observer;
pub mod state;

pub use buffer::{ReceiveBuffer, RX_BUFFER_SIZE};
pub use checksum::crc16;
pub use config::LinkConfig;
pub use error::LinkError;
pub use frame::{
    decode_header, encode_sync_probe, encode_sync_reply, Frame, FrameError, HeaderKind,
    PacketHeader, Packet, Payload, HEADER_SIZE, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, STROBE,
};
pub use machine::{LinkStateMachine, LinkStats, NextOperation, Operation, Outcome};
pub use observer::{NoopObserver, TransitionObserver};
pub use state::{ProtocolState, Role, Transition};

#[cfg(feature = "defmt")]
pub use observer::DefmtObserver;
