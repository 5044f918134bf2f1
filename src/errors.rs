use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// Structural problems with a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("wrong response size: expected {expected} bytes, got {actual}")]
    WrongSize { expected: usize, actual: usize },
    #[error("wrong checksum: computed {expected:#06X}, frame carries {actual:#06X}")]
    WrongChecksum { expected: u16, actual: u16 },
}

/// Status code carried in the low nibble of a 1-byte result frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Ok,
    IllegalCommand,
    InternalCounterError,
    PermissionDenied,
    ClockAlreadyCorrected,
    ChannelNotOpen,
    /// Reserved nibble values the meter is not documented to send.
    Unknown(u8),
}

impl DeviceStatus {
    /// Decode the raw status byte; only the low 4 bits are significant.
    pub fn from_byte(byte: u8) -> Self {
        match byte & 0x0F {
            0 => DeviceStatus::Ok,
            1 => DeviceStatus::IllegalCommand,
            2 => DeviceStatus::InternalCounterError,
            3 => DeviceStatus::PermissionDenied,
            4 => DeviceStatus::ClockAlreadyCorrected,
            5 => DeviceStatus::ChannelNotOpen,
            other => DeviceStatus::Unknown(other),
        }
    }

    pub fn is_ok(self) -> bool {
        self == DeviceStatus::Ok
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Ok => f.write_str("ok"),
            DeviceStatus::IllegalCommand => f.write_str("illegal command or parameter"),
            DeviceStatus::InternalCounterError => f.write_str("internal counter error"),
            DeviceStatus::PermissionDenied => f.write_str("permission denied"),
            DeviceStatus::ClockAlreadyCorrected => f.write_str("clock already corrected today"),
            DeviceStatus::ChannelNotOpen => f.write_str("communication channel is not open"),
            DeviceStatus::Unknown(code) => write!(f, "unknown status {code:#X}"),
        }
    }
}

/// The exchange a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Probe,
    Initialize,
    Voltage,
    Current,
    PowerFactor,
    Frequency,
    PhaseAngles,
    ActivePower,
    ReactivePower,
    EnergyCounter,
    Terminate,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Probe => "communication channel test",
            Step::Initialize => "connection initialisation",
            Step::Voltage => "voltage query",
            Step::Current => "current query",
            Step::PowerFactor => "cos(f) query",
            Step::Frequency => "grid frequency query",
            Step::PhaseAngles => "phase angles query",
            Step::ActivePower => "active power query",
            Step::ReactivePower => "reactive power query",
            Step::EnergyCounter => "power counters query",
            Step::Terminate => "connection closing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("{step} failed: wrong response size (expected {expected} bytes, got {actual})")]
    WrongSize {
        step: Step,
        expected: usize,
        actual: usize,
    },
    #[error("{step} failed: wrong checksum (computed {expected:#06X}, received {actual:#06X})")]
    WrongChecksum { step: Step, expected: u16, actual: u16 },
    #[error("{step} failed: communication channel timeout after {timeout:?}")]
    ChannelTimeout { step: Step, timeout: Duration },
    #[error("{step} failed: meter answered \"{status}\"")]
    Device { step: Step, status: DeviceStatus },
    #[error("device not ready: {0}")]
    NotReady(String),
}

impl DriverError {
    pub(crate) fn frame(step: Step, err: FrameError) -> Self {
        match err {
            FrameError::WrongSize { expected, actual } => DriverError::WrongSize {
                step,
                expected,
                actual,
            },
            FrameError::WrongChecksum { expected, actual } => DriverError::WrongChecksum {
                step,
                expected,
                actual,
            },
        }
    }

    /// True when the meter never answered within the channel timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::ChannelTimeout { .. })
    }

    /// The exchange this error belongs to, when it came from one.
    pub fn step(&self) -> Option<Step> {
        match self {
            DriverError::WrongSize { step, .. }
            | DriverError::WrongChecksum { step, .. }
            | DriverError::ChannelTimeout { step, .. }
            | DriverError::Device { step, .. } => Some(*step),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_uses_low_nibble_only() {
        assert_eq!(DeviceStatus::from_byte(0x00), DeviceStatus::Ok);
        assert_eq!(DeviceStatus::from_byte(0xF0), DeviceStatus::Ok);
        assert_eq!(DeviceStatus::from_byte(0x31), DeviceStatus::IllegalCommand);
        assert_eq!(DeviceStatus::from_byte(0x05), DeviceStatus::ChannelNotOpen);
        assert_eq!(DeviceStatus::from_byte(0x0C), DeviceStatus::Unknown(0x0C));
        assert!(!DeviceStatus::Unknown(6).is_ok());
    }

    #[test]
    fn frame_errors_keep_their_step() {
        let err = DriverError::frame(
            Step::Voltage,
            FrameError::WrongSize {
                expected: 12,
                actual: 4,
            },
        );
        assert_eq!(err.step(), Some(Step::Voltage));
        assert!(!err.is_timeout());
        assert!(err.to_string().starts_with("voltage query failed"));
    }
}
