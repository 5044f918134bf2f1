//! CRC-16 (Modbus polynomial) used to seal every frame.
//!
//! The meter transmits the accumulator low byte first, so the value is
//! embedded with [`u16::to_le_bytes`] and read back with [`u16::from_le_bytes`].

use crc::{Crc, CRC_16_MODBUS};

/// CRC-16/MODBUS: init 0xFFFF, reflected polynomial 0xA001.
const CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Number of checksum bytes trailing every frame.
pub const CHECKSUM_LEN: usize = 2;

/// Compute the 16-bit checksum over `bytes`.
pub fn checksum(bytes: &[u8]) -> u16 {
    CRC.checksum(bytes)
}

/// Append the checksum of `frame` to itself.
pub fn seal(frame: &mut Vec<u8>) {
    let crc = checksum(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Checksum carried in the trailing two bytes of `frame`, if it is long enough.
pub fn embedded(frame: &[u8]) -> Option<u16> {
    let split = frame.len().checked_sub(CHECKSUM_LEN)?;
    Some(u16::from_le_bytes([frame[split], frame[split + 1]]))
}
