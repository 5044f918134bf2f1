//! Scaled value decoding.
//!
//! The meter packs measurements as unsigned integers with a non-standard
//! byte order, divided by a per-quantity scale factor on the host.

use serde::Serialize;

/// Voltage, frequency and phase angle are reported in hundredths.
pub const SCALE_HUNDREDTHS: f64 = 100.0;
/// Current, power factor, power and energy are reported in thousandths.
pub const SCALE_THOUSANDTHS: f64 = 1000.0;

/// Decode a 3-byte value: `b0` is the high byte, then `b2`, then `b1`.
pub fn decode3(bytes: [u8; 3], scale: f64) -> f64 {
    let raw = ((bytes[0] as u32) << 16) | ((bytes[2] as u32) << 8) | bytes[1] as u32;
    raw as f64 / scale
}

/// Decode a 4-byte value: word order is kept, bytes inside each word are swapped.
pub fn decode4(bytes: [u8; 4], scale: f64) -> f64 {
    let raw = ((bytes[1] as u32) << 24)
        | ((bytes[0] as u32) << 16)
        | ((bytes[3] as u32) << 8)
        | bytes[2] as u32;
    raw as f64 / scale
}

/// One value per electrical phase.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Phases {
    pub p1: f64,
    pub p2: f64,
    pub p3: f64,
}

impl Phases {
    pub fn new(p1: f64, p2: f64, p3: f64) -> Self {
        Self { p1, p2, p3 }
    }
}

/// Per-phase values plus their aggregate over all phases.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PhasesWithSum {
    pub sum: f64,
    pub p1: f64,
    pub p2: f64,
    pub p3: f64,
}

impl PhasesWithSum {
    pub fn new(sum: f64, p1: f64, p2: f64, p3: f64) -> Self {
        Self { sum, p1, p2, p3 }
    }
}

/// Split a payload of `N`-byte groups into fixed arrays.
pub(crate) fn groups<const N: usize>(payload: &[u8]) -> impl Iterator<Item = [u8; N]> + '_ {
    payload.chunks_exact(N).map(|chunk| {
        let mut group = [0u8; N];
        group.copy_from_slice(chunk);
        group
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn decode3_swaps_low_bytes() {
        // (0x01 << 16) | (0x03 << 8) | 0x02 = 66306
        assert!(close(decode3([0x01, 0x02, 0x03], SCALE_HUNDREDTHS), 663.06));
    }

    #[test]
    fn decode4_swaps_within_words() {
        // (0x02 << 24) | (0x01 << 16) | (0x04 << 8) | 0x03 = 33620995
        assert!(close(decode4([0x01, 0x02, 0x03, 0x04], SCALE_THOUSANDTHS), 33620.995));
    }

    #[test]
    fn typical_mains_voltage() {
        // 23012 -> 230.12 V, packed as 0x00 | 0xE4 | 0x59
        assert!(close(decode3([0x00, 0xE4, 0x59], SCALE_HUNDREDTHS), 230.12));
    }

    #[test]
    fn zero_and_maximum() {
        assert_eq!(decode3([0, 0, 0], SCALE_THOUSANDTHS), 0.0);
        assert!(close(decode3([0xFF; 3], 1.0), 16_777_215.0));
        assert!(close(decode4([0xFF; 4], 1.0), 4_294_967_295.0));
    }

    #[test]
    fn decode4_high_bit_stays_positive() {
        // b1 is the top byte; 0x80 there is 2^31, not a negative count
        assert!(close(decode4([0x00, 0x80, 0x00, 0x00], 1.0), 2_147_483_648.0));
        assert!(decode4([0x00, 0xFF, 0x00, 0x00], SCALE_THOUSANDTHS) > 0.0);
    }

    #[test]
    fn groups_splits_payload() {
        let payload = [1, 2, 3, 4, 5, 6];
        let parts: Vec<[u8; 3]> = groups(&payload).collect();
        assert_eq!(parts, vec![[1, 2, 3], [4, 5, 6]]);
    }
}
