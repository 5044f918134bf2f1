//! Mercury 236 power meter driver.
//!
//! This crate talks to a Mercury 236 three-phase electricity meter over a
//! half-duplex RS485 line (usually a USB dongle) and collects grid
//! measurements: voltage, current, cos(f), frequency, phase angles, active
//! and reactive power, and the energy counters.
//!
//! # Protocol
//!
//! Frames look like Modbus RTU but are not: the CRC-16 trailer is sent low
//! byte first and multi-byte values use a vendor byte order (see [`decode`]).
//! Every request is answered by a response of a fixed, known length.
//!
//! # Sessions
//!
//! [`poll`] runs the standard reading session. A meter that never answers the
//! first channel test is reported as offline with zero readings; every other
//! failure is returned as a [`DriverError`].

pub mod checksum;
pub mod decode;
mod errors;
pub mod frame;
mod logging;
mod meter;
pub mod transport;

pub use decode::{Phases, PhasesWithSum};
pub use errors::*;
pub use frame::{EnergyPeriod, Request, ResponseShape};
pub use logging::init_logging;
pub use meter::{
    poll, Measurements, Meter, Poll, SessionConfig, SessionState, CHANNEL_TIMEOUT, COMMAND_DELAY,
    DEFAULT_ACCESS_LEVEL, DEFAULT_ADDRESS, DEFAULT_CREDENTIAL,
};
pub use transport::{SerialSettings, SerialTransport, Transport};
