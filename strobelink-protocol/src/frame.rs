//! Frame encoding and decoding for the link protocol.
//!
//! Frame format (multi-byte fields are big-endian):
//! - STROBE (1 byte): 0xA5 start-of-frame marker
//! - ID (2 bytes): packet id, 0 is reserved for control frames
//! - LENGTH (2 bytes): payload length (0-255)
//! - HEADER CRC (2 bytes): CRC16 of STROBE, ID and LENGTH
//! - PAYLOAD (0-255 bytes): opaque application data
//! - PAYLOAD CRC (2 bytes): CRC16 of PAYLOAD
//!
//! The SYNC probe and SYNC reply are header-only frames with ID 0 and a
//! reserved LENGTH marker.

use heapless::Vec;

use crate::checksum::crc16;

/// Start-of-frame marker byte
pub const STROBE: u8 = 0xA5;

/// Header size: STROBE + ID + LENGTH + HEADER CRC
pub const HEADER_SIZE: usize = 1 + 2 + 2 + 2;

/// Trailer size: PAYLOAD CRC
pub const TRAILER_SIZE: usize = 2;

/// Maximum payload size in bytes
pub const MAX_PAYLOAD_SIZE: usize = 255;

/// Maximum complete frame size (header + MAX_PAYLOAD + trailer)
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE + TRAILER_SIZE;

/// Packet id carried by control (SYNC) frames
pub const CONTROL_PACKET_ID: u16 = 0;

/// LENGTH marker of a SYNC probe
pub const SYNC_PROBE_MARKER: u16 = 0x0000;

/// LENGTH marker of a SYNC reply
pub const SYNC_REPLY_MARKER: u16 = 0xFFFF;

/// Payload bytes of a data frame
pub type Payload = Vec<u8, MAX_PAYLOAD_SIZE>;

/// Encoded bytes of one frame, ready to be written to the transport
pub type Packet = Vec<u8, MAX_FRAME_SIZE>;

/// Errors that can occur during frame parsing or encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// First byte is not the strobe byte
    InvalidStrobe,
    /// Frame is incomplete (need more bytes)
    Incomplete,
    /// Header CRC read from the wire does not match the header bytes
    HeaderCrcMismatch { expected: u16, computed: u16 },
    /// Payload CRC read from the wire does not match the payload bytes
    PayloadCrcMismatch { expected: u16, computed: u16 },
    /// Declared payload length exceeds the allowed maximum
    OversizedFrame { length: u16, max: u16 },
    /// Payload handed to the encoder exceeds the allowed maximum
    PayloadTooLarge { length: usize, max: usize },
    /// Packet id 0 used for a data frame
    ReservedPacketId,
    /// Buffer too small for encoding
    BufferTooSmall,
}

/// Classification of a header by its id and length fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeaderKind {
    /// Regular data frame, followed by payload and payload CRC
    Data,
    /// SYNC probe sent by the primary
    SyncProbe,
    /// SYNC reply sent by the secondary
    SyncReply,
    /// Control id with an unknown marker
    Reserved,
}

/// Header fields of a frame being received
///
/// Holds both the CRC read from the wire and the one recomputed over the
/// received header bytes; the header is only accepted when they agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PacketHeader {
    /// Packet id
    pub packet_id: u16,
    /// Declared payload length (or control marker)
    pub payload_len: u16,
    /// Header CRC as read from the wire
    pub header_crc16: u16,
    /// Header CRC computed over the received bytes
    pub computed_header_crc16: u16,
}

impl PacketHeader {
    /// Read header fields from the first [`HEADER_SIZE`] bytes
    ///
    /// Only the strobe byte and the length of `bytes` are checked here; use
    /// [`decode_header`] to also validate the CRC and the payload length.
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Incomplete);
        }
        if bytes[0] != STROBE {
            return Err(FrameError::InvalidStrobe);
        }

        Ok(Self {
            packet_id: u16::from_be_bytes([bytes[1], bytes[2]]),
            payload_len: u16::from_be_bytes([bytes[3], bytes[4]]),
            header_crc16: u16::from_be_bytes([bytes[5], bytes[6]]),
            computed_header_crc16: crc16(&bytes[..5]),
        })
    }

    /// Check if the wire CRC matches the recomputed one
    pub fn crc_valid(&self) -> bool {
        self.header_crc16 == self.computed_header_crc16
    }

    /// Classify this header
    pub fn kind(&self) -> HeaderKind {
        if self.packet_id != CONTROL_PACKET_ID {
            return HeaderKind::Data;
        }
        match self.payload_len {
            SYNC_PROBE_MARKER => HeaderKind::SyncProbe,
            SYNC_REPLY_MARKER => HeaderKind::SyncReply,
            _ => HeaderKind::Reserved,
        }
    }

    /// Bytes that follow a data header: payload plus payload CRC
    pub fn body_len(&self) -> usize {
        self.payload_len as usize + TRAILER_SIZE
    }

    /// Header bytes as they appeared on the wire
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0] = STROBE;
        bytes[1..3].copy_from_slice(&self.packet_id.to_be_bytes());
        bytes[3..5].copy_from_slice(&self.payload_len.to_be_bytes());
        bytes[5..7].copy_from_slice(&self.header_crc16.to_be_bytes());
        bytes
    }
}

/// Decode and validate a header
///
/// Fails with [`FrameError::HeaderCrcMismatch`] when the header CRC does not
/// match, and with [`FrameError::OversizedFrame`] when a data header declares
/// more than `max_payload_len` bytes. Control headers are returned as-is;
/// callers decide what to do with them via [`PacketHeader::kind`].
pub fn decode_header(bytes: &[u8], max_payload_len: u16) -> Result<PacketHeader, FrameError> {
    let header = PacketHeader::parse(bytes)?;

    if !header.crc_valid() {
        return Err(FrameError::HeaderCrcMismatch {
            expected: header.header_crc16,
            computed: header.computed_header_crc16,
        });
    }

    if header.kind() == HeaderKind::Data && header.payload_len > max_payload_len {
        return Err(FrameError::OversizedFrame {
            length: header.payload_len,
            max: max_payload_len,
        });
    }

    Ok(header)
}

/// Write a header into the first [`HEADER_SIZE`] bytes of `buffer`
fn write_header(buffer: &mut [u8], packet_id: u16, length: u16) {
    buffer[0] = STROBE;
    buffer[1..3].copy_from_slice(&packet_id.to_be_bytes());
    buffer[3..5].copy_from_slice(&length.to_be_bytes());
    let crc = crc16(&buffer[..5]);
    buffer[5..7].copy_from_slice(&crc.to_be_bytes());
}

/// Encode the SYNC probe sent by the primary
pub fn encode_sync_probe() -> [u8; HEADER_SIZE] {
    let mut buffer = [0u8; HEADER_SIZE];
    write_header(&mut buffer, CONTROL_PACKET_ID, SYNC_PROBE_MARKER);
    buffer
}

/// Encode the SYNC reply sent by the secondary
pub fn encode_sync_reply() -> [u8; HEADER_SIZE] {
    let mut buffer = [0u8; HEADER_SIZE];
    write_header(&mut buffer, CONTROL_PACKET_ID, SYNC_REPLY_MARKER);
    buffer
}

/// A parsed or constructed data frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Packet id (never 0)
    pub packet_id: u16,
    /// Payload data
    pub payload: Payload,
}

impl Frame {
    /// Create a new frame with the given packet id and payload
    pub fn new(packet_id: u16, payload: &[u8]) -> Result<Self, FrameError> {
        if packet_id == CONTROL_PACKET_ID {
            return Err(FrameError::ReservedPacketId);
        }

        let payload = Vec::from_slice(payload).map_err(|_| FrameError::PayloadTooLarge {
            length: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        })?;

        Ok(Self { packet_id, payload })
    }

    /// Number of bytes this frame occupies on the wire
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload.len() + TRAILER_SIZE
    }

    /// Encode this frame into a byte buffer
    ///
    /// Returns the number of bytes written
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, FrameError> {
        let frame_len = self.wire_len();
        if buffer.len() < frame_len {
            return Err(FrameError::BufferTooSmall);
        }

        let payload_end = HEADER_SIZE + self.payload.len();
        write_header(buffer, self.packet_id, self.payload.len() as u16);
        buffer[HEADER_SIZE..payload_end].copy_from_slice(&self.payload);
        buffer[payload_end..frame_len].copy_from_slice(&crc16(&self.payload).to_be_bytes());

        Ok(frame_len)
    }

    /// Encode this frame into a heapless Vec
    pub fn encode_to_vec(&self) -> Result<Packet, FrameError> {
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        let len = self.encode(&mut buffer)?;
        Vec::from_slice(&buffer[..len]).map_err(|_| FrameError::BufferTooSmall)
    }

    /// Decode a complete data frame from the start of `bytes`
    ///
    /// Trailing bytes after the frame are ignored.
    pub fn decode(bytes: &[u8], max_payload_len: u16) -> Result<Self, FrameError> {
        let header = decode_header(bytes, max_payload_len)?;
        if header.kind() != HeaderKind::Data {
            return Err(FrameError::ReservedPacketId);
        }

        let payload_end = HEADER_SIZE + header.payload_len as usize;
        if bytes.len() < payload_end + TRAILER_SIZE {
            return Err(FrameError::Incomplete);
        }

        let payload = &bytes[HEADER_SIZE..payload_end];
        let expected = u16::from_be_bytes([bytes[payload_end], bytes[payload_end + 1]]);
        let computed = crc16(payload);
        if expected != computed {
            return Err(FrameError::PayloadCrcMismatch { expected, computed });
        }

        Self::new(header.packet_id, payload)
    }
}
