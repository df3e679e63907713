//! Serial communication abstractions
//!
//! The link protocol is half-duplex over a byte stream; these traits are
//! all it needs from the transport. Reads never block: the driver polls
//! whatever bytes are available.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use embedded_io::{ErrorKind, Read, ReadReady, Write};

/// Serial transmitter
pub trait SerialTx {
    /// Error type for transmit operations
    type Error;

    /// Write all of `data`
    ///
    /// Blocks until everything has been handed to the transport or an
    /// error occurs.
    fn write_all(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Flush any buffered data
    fn flush(&mut self) -> Result<(), Self::Error>;
}

/// Serial receiver
pub trait SerialRx {
    /// Error type for receive operations
    type Error;

    /// Read whatever is available into `buf` without blocking
    ///
    /// Returns the number of bytes read, 0 if nothing is pending.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// Combined serial interface
pub trait Serial: SerialTx + SerialRx {}

impl<T: SerialTx + SerialRx> Serial for T {}

/// Serial bus errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SerialError {
    /// Framing error
    Framing,
    /// Noise error
    Noise,
    /// Overrun error
    Overrun,
    /// Parity error
    Parity,
    /// Buffer too small
    BufferTooSmall,
    /// Transport accepted no bytes
    WriteZero,
    /// Other error
    Other,
}

impl SerialError {
    /// Map an `embedded-io` error kind onto a serial error
    pub fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::InvalidData => SerialError::Framing,
            ErrorKind::OutOfMemory => SerialError::Overrun,
            ErrorKind::InvalidInput => SerialError::BufferTooSmall,
            ErrorKind::WriteZero => SerialError::WriteZero,
            _ => SerialError::Other,
        }
    }
}

impl embedded_io::Error for SerialError {
    fn kind(&self) -> ErrorKind {
        match self {
            SerialError::Framing | SerialError::Noise | SerialError::Parity => {
                ErrorKind::InvalidData
            }
            SerialError::Overrun => ErrorKind::OutOfMemory,
            SerialError::BufferTooSmall => ErrorKind::InvalidInput,
            SerialError::WriteZero => ErrorKind::WriteZero,
            SerialError::Other => ErrorKind::Other,
        }
    }
}

/// Serial line configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SerialConfig {
    /// Baud rate in bits per second
    pub baudrate: u32,
    /// Number of data bits (typically 8)
    pub data_bits: DataBits,
    /// Parity mode
    pub parity: Parity,
    /// Number of stop bits
    pub stop_bits: StopBits,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baudrate: 115200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

impl SerialConfig {
    /// Approximate time on the wire for `bytes` bytes, in microseconds
    pub fn transfer_time_us(&self, bytes: usize) -> u64 {
        if self.baudrate == 0 {
            return 0;
        }
        let bits = 1 + self.data_bits.bits() + self.parity.bits() + self.stop_bits.bits();
        (bytes as u64 * bits as u64 * 1_000_000) / self.baudrate as u64
    }
}

/// Number of data bits per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DataBits {
    Seven,
    Eight,
    Nine,
}

impl DataBits {
    pub fn bits(&self) -> u32 {
        match self {
            DataBits::Seven => 7,
            DataBits::Eight => 8,
            DataBits::Nine => 9,
        }
    }
}

/// Parity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl Parity {
    pub fn bits(&self) -> u32 {
        match self {
            Parity::None => 0,
            Parity::Even | Parity::Odd => 1,
        }
    }
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum StopBits {
    One,
    Two,
}

impl StopBits {
    pub fn bits(&self) -> u32 {
        match self {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Serial port over any `embedded-io` stream
///
/// Write side needs [`Write`], read side needs [`Read`] + [`ReadReady`].
pub struct IoSerial<T> {
    inner: T,
}

impl<T> IoSerial<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

fn map_error<E: embedded_io::Error>(e: E) -> SerialError {
    SerialError::from_kind(e.kind())
}

impl<T: Write> SerialTx for IoSerial<T> {
    type Error = SerialError;

    fn write_all(&mut self, mut data: &[u8]) -> Result<(), SerialError> {
        while !data.is_empty() {
            match self.inner.write(data).map_err(map_error)? {
                0 => return Err(SerialError::WriteZero),
                n => data = &data[n..],
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SerialError> {
        self.inner.flush().map_err(map_error)
    }
}

impl<T: Read + ReadReady> SerialRx for IoSerial<T> {
    type Error = SerialError;

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        if buf.is_empty() {
            return Err(SerialError::BufferTooSmall);
        }
        if !self.inner.read_ready().map_err(map_error)? {
            return Ok(0);
        }
        self.inner.read(buf).map_err(map_error)
    }
}
