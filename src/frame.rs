//! Request builders and response validators.
//!
//! Frames are explicit byte buffers with named offsets:
//!
//! ```text
//! request:  <address> <command> <payload 0..8> <crc lo> <crc hi>
//! response: <address> <status | data ...>      <crc lo> <crc hi>
//! ```
//!
//! Every response shape has an exact length. A buffer of any other length is
//! rejected before its checksum is even looked at.

use crate::checksum::{self, CHECKSUM_LEN};
use crate::decode::{decode3, decode4, groups, Phases, PhasesWithSum};
use crate::errors::{DeviceStatus, FrameError};

// Command codes
pub const CMD_PROBE: u8 = 0x00;
pub const CMD_INITIALIZE: u8 = 0x01;
pub const CMD_TERMINATE: u8 = 0x02;
pub const CMD_READ_ENERGY: u8 = 0x05;
pub const CMD_READ_PARAMETER: u8 = 0x08;

/// Parameter id for the instantaneous values table.
pub const PARAM_INSTANT: u8 = 0x16;

// BWRI sub-selectors for PARAM_INSTANT
pub const BWRI_ACTIVE_POWER: u8 = 0x00;
pub const BWRI_REACTIVE_POWER: u8 = 0x08;
pub const BWRI_VOLTAGE: u8 = 0x11;
pub const BWRI_CURRENT: u8 = 0x21;
pub const BWRI_POWER_FACTOR: u8 = 0x30;
pub const BWRI_FREQUENCY: u8 = 0x40;
pub const BWRI_PHASE_ANGLE: u8 = 0x51;

/// Length of the initialise credential.
pub const CREDENTIAL_LEN: usize = 6;

/// Largest response we ever read in one go.
pub const MAX_FRAME_LEN: usize = 255;

const ADDRESS_LEN: usize = 1;

/// Accumulation period for the energy counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyPeriod {
    FromReset,
    ThisYear,
    LastYear,
    /// Calendar month, 1-12.
    Month(u8),
    Today,
    Yesterday,
}

impl EnergyPeriod {
    fn code(self) -> u8 {
        match self {
            EnergyPeriod::FromReset => 0,
            EnergyPeriod::ThisYear => 1,
            EnergyPeriod::LastYear => 2,
            EnergyPeriod::Month(_) => 3,
            EnergyPeriod::Today => 4,
            EnergyPeriod::Yesterday => 5,
        }
    }

    /// The parameter byte: period in the high nibble, month in the low one.
    pub fn param_id(self) -> u8 {
        let month = match self {
            EnergyPeriod::Month(m) => m & 0x0F,
            _ => 0,
        };
        (self.code() << 4) | month
    }
}

/// A request ready to be written to the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    bytes: Vec<u8>,
    shape: ResponseShape,
}

impl Request {
    fn sealed(mut bytes: Vec<u8>, shape: ResponseShape) -> Self {
        checksum::seal(&mut bytes);
        Self { bytes, shape }
    }

    /// Channel test.
    pub fn probe(address: u8) -> Self {
        Self::sealed(vec![address, CMD_PROBE], ResponseShape::Status)
    }

    /// Open a session at `access_level` with a 6-byte credential.
    pub fn initialize(address: u8, access_level: u8, credential: &[u8; CREDENTIAL_LEN]) -> Self {
        let mut bytes = Vec::with_capacity(2 + 1 + CREDENTIAL_LEN + CHECKSUM_LEN);
        bytes.extend_from_slice(&[address, CMD_INITIALIZE, access_level]);
        bytes.extend_from_slice(credential);
        Self::sealed(bytes, ResponseShape::Status)
    }

    /// Close the session.
    pub fn terminate(address: u8) -> Self {
        Self::sealed(vec![address, CMD_TERMINATE], ResponseShape::Status)
    }

    /// Generic read-parameter request; the caller says what shape comes back.
    pub fn read_parameter(address: u8, param_id: u8, bwri: u8, shape: ResponseShape) -> Self {
        Self::sealed(vec![address, CMD_READ_PARAMETER, param_id, bwri], shape)
    }

    /// Energy counters for `period`; `tariff` 0 means all tariffs.
    pub fn read_energy(address: u8, period: EnergyPeriod, tariff: u8) -> Self {
        Self::sealed(
            vec![address, CMD_READ_ENERGY, period.param_id(), tariff],
            ResponseShape::SumPhases4x4,
        )
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Shape of the response this request expects.
    pub fn shape(&self) -> ResponseShape {
        self.shape
    }
}

/// The fixed layouts a response can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// address, status, crc
    Status,
    /// address, value(3), crc
    Scalar3,
    /// address, 3 x value(3), crc
    Phases3x3,
    /// address, sum(3), 3 x value(3), crc
    SumPhases3x3,
    /// address, sum(4), 3 x value(4), crc
    SumPhases4x4,
}

impl ResponseShape {
    /// Number of payload bytes between address and checksum.
    pub fn payload_len(self) -> usize {
        match self {
            ResponseShape::Status => 1,
            ResponseShape::Scalar3 => 3,
            ResponseShape::Phases3x3 => 9,
            ResponseShape::SumPhases3x3 => 12,
            ResponseShape::SumPhases4x4 => 16,
        }
    }

    /// Exact length of a well-formed response.
    pub fn frame_len(self) -> usize {
        ADDRESS_LEN + self.payload_len() + CHECKSUM_LEN
    }
}

/// Check length and checksum, returning the payload on success.
pub fn validate(frame: &[u8], shape: ResponseShape) -> Result<&[u8], FrameError> {
    let expected_len = shape.frame_len();
    if frame.len() != expected_len {
        return Err(FrameError::WrongSize {
            expected: expected_len,
            actual: frame.len(),
        });
    }

    let body_end = frame.len() - CHECKSUM_LEN;
    let computed = checksum::checksum(&frame[..body_end]);
    let carried = u16::from_le_bytes([frame[body_end], frame[body_end + 1]]);
    if computed != carried {
        return Err(FrameError::WrongChecksum {
            expected: computed,
            actual: carried,
        });
    }

    Ok(&frame[ADDRESS_LEN..body_end])
}

/// Validate a 1-byte result and extract the device status.
pub fn parse_status(frame: &[u8]) -> Result<DeviceStatus, FrameError> {
    let payload = validate(frame, ResponseShape::Status)?;
    Ok(DeviceStatus::from_byte(payload[0]))
}

/// Validate a 3-byte scalar result.
pub fn parse_scalar(frame: &[u8], scale: f64) -> Result<f64, FrameError> {
    let payload = validate(frame, ResponseShape::Scalar3)?;
    Ok(decode3([payload[0], payload[1], payload[2]], scale))
}

/// Validate a 3 x 3-byte per-phase result.
pub fn parse_phases(frame: &[u8], scale: f64) -> Result<Phases, FrameError> {
    let payload = validate(frame, ResponseShape::Phases3x3)?;
    let v: Vec<f64> = groups::<3>(payload).map(|g| decode3(g, scale)).collect();
    Ok(Phases::new(v[0], v[1], v[2]))
}

/// Validate a sum + 3 x 3-byte result.
pub fn parse_phases_with_sum(frame: &[u8], scale: f64) -> Result<PhasesWithSum, FrameError> {
    let payload = validate(frame, ResponseShape::SumPhases3x3)?;
    let v: Vec<f64> = groups::<3>(payload).map(|g| decode3(g, scale)).collect();
    Ok(PhasesWithSum::new(v[0], v[1], v[2], v[3]))
}

/// Validate a sum + 3 x 4-byte energy counter result.
pub fn parse_energy(frame: &[u8], scale: f64) -> Result<PhasesWithSum, FrameError> {
    let payload = validate(frame, ResponseShape::SumPhases4x4)?;
    let v: Vec<f64> = groups::<4>(payload).map(|g| decode4(g, scale)).collect();
    Ok(PhasesWithSum::new(v[0], v[1], v[2], v[3]))
}

/// Space-separated upper-case hex, as used in frame traces.
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{SCALE_HUNDREDTHS, SCALE_THOUSANDTHS};

    fn response(body: &[u8]) -> Vec<u8> {
        let mut frame = body.to_vec();
        checksum::seal(&mut frame);
        frame
    }

    fn all_requests() -> Vec<Request> {
        vec![
            Request::probe(0),
            Request::initialize(0, 1, &[1; 6]),
            Request::terminate(0),
            Request::read_parameter(0, PARAM_INSTANT, BWRI_VOLTAGE, ResponseShape::Phases3x3),
            Request::read_energy(0, EnergyPeriod::Today, 0),
        ]
    }

    #[test]
    fn request_lengths() {
        let lens: Vec<usize> = all_requests().iter().map(|r| r.as_bytes().len()).collect();
        assert_eq!(lens, vec![4, 11, 4, 6, 6]);
    }

    #[test]
    fn request_checksums_cover_all_but_trailer() {
        for request in all_requests() {
            let bytes = request.as_bytes();
            let body = &bytes[..bytes.len() - 2];
            assert_eq!(checksum::embedded(bytes), Some(checksum::checksum(body)));
        }
    }

    #[test]
    fn initialize_layout() {
        let request = Request::initialize(0x2A, 0x02, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(&request.as_bytes()[..9], &[0x2A, 0x01, 0x02, 1, 2, 3, 4, 5, 6]);
        assert_eq!(request.shape(), ResponseShape::Status);
    }

    #[test]
    fn known_request_bytes() {
        assert_eq!(Request::probe(0).as_bytes(), &[0x00, 0x00, 0x01, 0xB0]);
        assert_eq!(
            Request::initialize(0, 1, &[1; 6]).as_bytes(),
            &[0x00, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x77, 0x81]
        );
        assert_eq!(
            Request::read_parameter(0, PARAM_INSTANT, BWRI_VOLTAGE, ResponseShape::Phases3x3)
                .as_bytes(),
            &[0x00, 0x08, 0x16, 0x11, 0x4F, 0x8A]
        );
    }

    #[test]
    fn energy_param_packs_period_and_month() {
        assert_eq!(EnergyPeriod::FromReset.param_id(), 0x00);
        assert_eq!(EnergyPeriod::Yesterday.param_id(), 0x50);
        assert_eq!(EnergyPeriod::Today.param_id(), 0x40);
        assert_eq!(EnergyPeriod::Month(11).param_id(), 0x3B);
        let request = Request::read_energy(0, EnergyPeriod::Yesterday, 2);
        assert_eq!(&request.as_bytes()[..4], &[0x00, CMD_READ_ENERGY, 0x50, 0x02]);
    }

    #[test]
    fn shape_lengths() {
        assert_eq!(ResponseShape::Status.frame_len(), 4);
        assert_eq!(ResponseShape::Scalar3.frame_len(), 6);
        assert_eq!(ResponseShape::Phases3x3.frame_len(), 12);
        assert_eq!(ResponseShape::SumPhases3x3.frame_len(), 15);
        assert_eq!(ResponseShape::SumPhases4x4.frame_len(), 19);
    }

    #[test]
    fn wrong_length_is_reported_before_checksum() {
        // a perfectly sealed status frame is still the wrong size for a scalar
        let frame = response(&[0x00, 0x00]);
        assert_eq!(
            validate(&frame, ResponseShape::Scalar3),
            Err(FrameError::WrongSize {
                expected: 6,
                actual: 4
            })
        );
        assert!(matches!(
            validate(&[], ResponseShape::Status),
            Err(FrameError::WrongSize { actual: 0, .. })
        ));
    }

    #[test]
    fn tampered_checksum_is_rejected() {
        let mut frame = response(&[0x00, 0x01, 0x02, 0x03]);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(matches!(
            parse_scalar(&frame, SCALE_HUNDREDTHS),
            Err(FrameError::WrongChecksum { .. })
        ));
    }

    #[test]
    fn status_frames() {
        assert_eq!(parse_status(&response(&[0x00, 0x00])), Ok(DeviceStatus::Ok));
        assert_eq!(
            parse_status(&response(&[0x00, 0x03])),
            Ok(DeviceStatus::PermissionDenied)
        );
        assert_eq!(
            parse_status(&response(&[0x00, 0xA5])),
            Ok(DeviceStatus::ChannelNotOpen)
        );
    }

    #[test]
    fn phases_are_decoded_in_order() {
        let frame = response(&[0x00, 0x00, 0xE4, 0x59, 0x00, 0xE5, 0x59, 0x00, 0xE6, 0x59]);
        let phases = parse_phases(&frame, SCALE_HUNDREDTHS).unwrap();
        assert!((phases.p1 - 230.12).abs() < 1e-9);
        assert!((phases.p2 - 230.13).abs() < 1e-9);
        assert!((phases.p3 - 230.14).abs() < 1e-9);
    }

    #[test]
    fn sum_comes_first() {
        let frame = response(&[0x00, 0, 0x03, 0, 0, 0x01, 0, 0, 0x01, 0, 0, 0x01, 0]);
        let values = parse_phases_with_sum(&frame, SCALE_THOUSANDTHS).unwrap();
        assert_eq!(values, PhasesWithSum::new(0.003, 0.001, 0.001, 0.001));
    }

    #[test]
    fn energy_uses_four_byte_groups() {
        let frame = response(&[
            0x00, 0x01, 0x02, 0x03, 0x04, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        ]);
        let values = parse_energy(&frame, SCALE_THOUSANDTHS).unwrap();
        assert!((values.sum - 33620.995).abs() < 1e-9);
        assert_eq!(values.p1, 0.0);
    }

    #[test]
    fn hex_formatting() {
        assert_eq!(hex(&[0x00, 0x0A, 0xFF]), "00 0A FF");
        assert_eq!(hex(&[]), "");
    }
}
