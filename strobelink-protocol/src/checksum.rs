//! CRC16 used for both header and payload checksums.
//!
//! CRC-16/CCITT-FALSE: polynomial 0x1021, initial value 0xFFFF, no
//! reflection, no final xor. Check value over `"123456789"` is 0x29B1.

use crc::{Crc, CRC_16_IBM_3740};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute the link checksum over `bytes`
pub fn crc16(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_empty_input_is_initial_value() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_single_bit_flip_changes_crc() {
        let data = [0xA5, 0x00, 0x01, 0x00, 0x04];
        let base = crc16(&data);

        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut corrupted = data;
                corrupted[byte] ^= 1 << bit;
                assert_ne!(crc16(&corrupted), base);
            }
        }
    }
}
