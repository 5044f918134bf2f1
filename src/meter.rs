//! Mercury 236 session controller.
//!
//! The meter sits on a half-duplex RS485 line, so every exchange is a strict
//! request/response round trip:
//!
//! 1. write the request frame
//! 2. wait [`SessionConfig::command_delay`] for the meter to turn around
//! 3. wait up to [`SessionConfig::channel_timeout`] for the response
//! 4. validate size and checksum, then decode
//!
//! A reading session runs probe, initialise, the instantaneous value queries,
//! the energy counters and finally terminate. [`poll`] drives that whole
//! sequence; [`Meter`] exposes each step for callers that need finer control.
//!
//! **Failure policy:** only a timeout on the very first probe is recoverable,
//! reported as an offline meter with all-zero measurements. Everything else,
//! including the same timeout later in the session, aborts it.

use std::io;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use crate::decode::{Phases, PhasesWithSum, SCALE_HUNDREDTHS, SCALE_THOUSANDTHS};
use crate::errors::{DeviceStatus, DriverError, FrameError, Result, Step};
use crate::frame::{self, EnergyPeriod, Request, ResponseShape, CREDENTIAL_LEN, MAX_FRAME_LEN};
use crate::transport::Transport;

// ============================================================================
// Constants
// ============================================================================

/// RS485 address the meter answers on out of the box.
pub const DEFAULT_ADDRESS: u8 = 0x00;

/// Access level requested when opening a session (1 = user).
pub const DEFAULT_ACCESS_LEVEL: u8 = 0x01;

/// Factory user password.
pub const DEFAULT_CREDENTIAL: [u8; CREDENTIAL_LEN] = [0x01; CREDENTIAL_LEN];

/// Meter turnaround time between a request and its response.
pub const COMMAND_DELAY: Duration = Duration::from_millis(50);

/// How long to wait for a response before declaring the channel dead.
pub const CHANNEL_TIMEOUT: Duration = Duration::from_secs(2);

/// Tariff selector meaning "all tariffs".
const ALL_TARIFFS: u8 = 0;

// ============================================================================
// Data Types
// ============================================================================

/// Per-session parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub address: u8,
    pub access_level: u8,
    pub credential: [u8; CREDENTIAL_LEN],
    pub command_delay: Duration,
    pub channel_timeout: Duration,
    /// Log every transmitted and received frame in hex.
    pub trace_frames: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            access_level: DEFAULT_ACCESS_LEVEL,
            credential: DEFAULT_CREDENTIAL,
            command_delay: COMMAND_DELAY,
            channel_timeout: CHANNEL_TIMEOUT,
            trace_frames: false,
        }
    }
}

impl SessionConfig {
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    pub fn with_credential(mut self, access_level: u8, credential: [u8; CREDENTIAL_LEN]) -> Self {
        self.access_level = access_level;
        self.credential = credential;
        self
    }

    pub fn with_timing(mut self, command_delay: Duration, channel_timeout: Duration) -> Self {
        self.command_delay = command_delay;
        self.channel_timeout = channel_timeout;
        self
    }

    pub fn with_trace_frames(mut self, enabled: bool) -> Self {
        self.trace_frames = enabled;
        self
    }
}

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Disconnected,
    ChannelOk,
    Initialized,
    Querying,
    Terminated,
    Aborted,
}

/// Everything a full reading session collects.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Measurements {
    /// Volts
    pub voltage: Phases,
    /// Amperes
    pub current: Phases,
    /// cos(f)
    pub power_factor: PhasesWithSum,
    /// Hertz
    pub frequency: f64,
    /// Degrees
    pub phase_angles: Phases,
    /// Watts
    pub active_power: PhasesWithSum,
    /// Volt-amperes
    pub reactive_power: PhasesWithSum,
    /// kWh since the counters were reset
    pub energy_from_reset: PhasesWithSum,
    /// kWh
    pub energy_yesterday: PhasesWithSum,
    /// kWh
    pub energy_today: PhasesWithSum,
}

/// Result of [`poll`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Poll {
    /// `Terminated` after a full session, `Disconnected` when the meter never answered.
    pub state: SessionState,
    pub measurements: Measurements,
}

impl Poll {
    /// Whether the meter answered the first probe.
    pub fn meter_online(&self) -> bool {
        self.state != SessionState::Disconnected
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Sent,
    Received,
}

// ============================================================================
// Meter Session
// ============================================================================

/// One session with a single meter over an exclusively owned transport.
///
/// # Example
/// ```ignore
/// let transport = SerialTransport::open(&SerialSettings::default())?;
/// let mut meter = Meter::new(transport, SessionConfig::default());
/// meter.check_channel()?;
/// meter.open()?;
/// println!("U = {:?}", meter.read_voltage()?);
/// meter.close()?;
/// ```
pub struct Meter<T: Transport> {
    transport: T,
    config: SessionConfig,
    state: SessionState,
    /// Set once the first channel test has gone out.
    channel_checked: bool,
}

impl<T: Transport> Meter<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            state: SessionState::Disconnected,
            channel_checked: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Give the transport back, ending the session.
    pub fn into_inner(self) -> T {
        self.transport
    }

    // ------------------------------------------------------------------------
    // Session Commands
    // ------------------------------------------------------------------------

    /// Test the communication channel.
    ///
    /// A timeout on the very first attempt leaves the state `Disconnected` so
    /// the caller can treat the meter as absent. Any other failure, including
    /// a timeout on a later attempt, aborts.
    pub fn check_channel(&mut self) -> Result<()> {
        self.require(&[SessionState::Disconnected, SessionState::ChannelOk], "probe")?;
        let first_attempt = !self.channel_checked;
        self.channel_checked = true;
        let request = Request::probe(self.config.address);
        match self.expect_ok(Step::Probe, &request) {
            Ok(()) => {
                self.transition(SessionState::ChannelOk);
                Ok(())
            }
            Err(e) if e.is_timeout() && first_attempt => Err(e),
            Err(e) => Err(self.abort(e)),
        }
    }

    /// Open the session with the configured access level and credential.
    pub fn open(&mut self) -> Result<()> {
        self.require(&[SessionState::ChannelOk], "initialise")?;
        let request = Request::initialize(
            self.config.address,
            self.config.access_level,
            &self.config.credential,
        );
        self.expect_ok(Step::Initialize, &request)
            .map_err(|e| self.abort(e))?;
        self.transition(SessionState::Initialized);
        Ok(())
    }

    /// Close the session.
    pub fn close(&mut self) -> Result<()> {
        self.require(&[SessionState::Initialized, SessionState::Querying], "terminate")?;
        let request = Request::terminate(self.config.address);
        self.expect_ok(Step::Terminate, &request)
            .map_err(|e| self.abort(e))?;
        self.transition(SessionState::Terminated);
        Ok(())
    }

    /// Voltage per phase (V).
    pub fn read_voltage(&mut self) -> Result<Phases> {
        self.query(
            Step::Voltage,
            frame::BWRI_VOLTAGE,
            ResponseShape::Phases3x3,
            |f| frame::parse_phases(f, SCALE_HUNDREDTHS),
        )
    }

    /// Current per phase (A).
    pub fn read_current(&mut self) -> Result<Phases> {
        self.query(
            Step::Current,
            frame::BWRI_CURRENT,
            ResponseShape::Phases3x3,
            |f| frame::parse_phases(f, SCALE_THOUSANDTHS),
        )
    }

    /// Power factor cos(f) per phase and overall.
    pub fn read_power_factor(&mut self) -> Result<PhasesWithSum> {
        self.query(
            Step::PowerFactor,
            frame::BWRI_POWER_FACTOR,
            ResponseShape::SumPhases3x3,
            |f| frame::parse_phases_with_sum(f, SCALE_THOUSANDTHS),
        )
    }

    /// Grid frequency (Hz).
    pub fn read_frequency(&mut self) -> Result<f64> {
        self.query(
            Step::Frequency,
            frame::BWRI_FREQUENCY,
            ResponseShape::Scalar3,
            |f| frame::parse_scalar(f, SCALE_HUNDREDTHS),
        )
    }

    /// Angles between phases (degrees).
    pub fn read_phase_angles(&mut self) -> Result<Phases> {
        self.query(
            Step::PhaseAngles,
            frame::BWRI_PHASE_ANGLE,
            ResponseShape::Phases3x3,
            |f| frame::parse_phases(f, SCALE_HUNDREDTHS),
        )
    }

    /// Active power per phase and total (W).
    pub fn read_active_power(&mut self) -> Result<PhasesWithSum> {
        self.query(
            Step::ActivePower,
            frame::BWRI_ACTIVE_POWER,
            ResponseShape::SumPhases3x3,
            |f| frame::parse_phases_with_sum(f, SCALE_THOUSANDTHS),
        )
    }

    /// Reactive power per phase and total (VA).
    pub fn read_reactive_power(&mut self) -> Result<PhasesWithSum> {
        self.query(
            Step::ReactivePower,
            frame::BWRI_REACTIVE_POWER,
            ResponseShape::SumPhases3x3,
            |f| frame::parse_phases_with_sum(f, SCALE_THOUSANDTHS),
        )
    }

    /// Energy counters for `period` (kWh). `tariff` 0 selects all tariffs.
    pub fn read_energy(&mut self, period: EnergyPeriod, tariff: u8) -> Result<PhasesWithSum> {
        self.require(&[SessionState::Initialized, SessionState::Querying], "energy query")?;
        let request = Request::read_energy(self.config.address, period, tariff);
        debug!("reading energy counters: period={:?}, tariff={}", period, tariff);
        self.decode_query(Step::EnergyCounter, &request, |f| {
            frame::parse_energy(f, SCALE_THOUSANDTHS)
        })
    }

    // ------------------------------------------------------------------------
    // Internal Methods
    // ------------------------------------------------------------------------

    fn query<V>(
        &mut self,
        step: Step,
        bwri: u8,
        shape: ResponseShape,
        parse: impl FnOnce(&[u8]) -> std::result::Result<V, FrameError>,
    ) -> Result<V> {
        self.require(&[SessionState::Initialized, SessionState::Querying], "query")?;
        let request =
            Request::read_parameter(self.config.address, frame::PARAM_INSTANT, bwri, shape);
        self.decode_query(step, &request, parse)
    }

    fn decode_query<V>(
        &mut self,
        step: Step,
        request: &Request,
        parse: impl FnOnce(&[u8]) -> std::result::Result<V, FrameError>,
    ) -> Result<V> {
        let reply = self.exchange(step, request).map_err(|e| self.abort(e))?;
        let value = parse(&reply).map_err(|e| self.abort(DriverError::frame(step, e)))?;
        if self.state == SessionState::Initialized {
            self.transition(SessionState::Querying);
        }
        Ok(value)
    }

    /// Exchange a request that is answered by a 1-byte status frame.
    fn expect_ok(&mut self, step: Step, request: &Request) -> Result<()> {
        let reply = self.exchange(step, request)?;
        let status = frame::parse_status(&reply).map_err(|e| DriverError::frame(step, e))?;
        match status {
            DeviceStatus::Ok => Ok(()),
            status => Err(DriverError::Device { step, status }),
        }
    }

    /// One round trip on the line.
    fn exchange(&mut self, step: Step, request: &Request) -> Result<Vec<u8>> {
        let bytes = request.as_bytes();
        self.trace(Direction::Sent, bytes);

        let written = self.transport.write(bytes)?;
        if written != bytes.len() {
            return Err(DriverError::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("{step}: wrote {written} of {} bytes", bytes.len()),
            )));
        }
        thread::sleep(self.config.command_delay);

        let reply = self
            .transport
            .read_with_timeout(MAX_FRAME_LEN, self.config.channel_timeout)?;
        if reply.is_empty() {
            return Err(DriverError::ChannelTimeout {
                step,
                timeout: self.config.channel_timeout,
            });
        }
        self.trace(Direction::Received, &reply);
        Ok(reply)
    }

    fn trace(&self, direction: Direction, bytes: &[u8]) {
        if self.config.trace_frames {
            let label = match direction {
                Direction::Sent => "Sent",
                Direction::Received => "Received",
            };
            info!("{} bytes: {}\n\t{}", label, bytes.len(), frame::hex(bytes));
        }
    }

    fn require(&self, allowed: &[SessionState], what: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(DriverError::NotReady(format!(
                "cannot {what} while session is {:?}",
                self.state
            )))
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!("session state: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn abort(&mut self, err: DriverError) -> DriverError {
        debug!("session aborted: {}", err);
        self.state = SessionState::Aborted;
        err
    }
}

// ============================================================================
// Full Reading Session
// ============================================================================

/// Run a complete reading session against the meter.
///
/// The transport is consumed and dropped before this returns, on success and
/// on every failure path alike.
pub fn poll<T: Transport>(transport: T, config: SessionConfig) -> Result<Poll> {
    let mut meter = Meter::new(transport, config);

    match meter.check_channel() {
        Ok(()) => {}
        Err(e) if e.is_timeout() && meter.state() == SessionState::Disconnected => {
            warn!("power meter did not answer the channel test, reporting zeros");
            return Ok(Poll {
                state: SessionState::Disconnected,
                measurements: Measurements::default(),
            });
        }
        Err(e) => return Err(e),
    }

    meter.open()?;

    let measurements = Measurements {
        voltage: meter.read_voltage()?,
        current: meter.read_current()?,
        power_factor: meter.read_power_factor()?,
        frequency: meter.read_frequency()?,
        phase_angles: meter.read_phase_angles()?,
        active_power: meter.read_active_power()?,
        reactive_power: meter.read_reactive_power()?,
        energy_from_reset: meter.read_energy(EnergyPeriod::FromReset, ALL_TARIFFS)?,
        energy_yesterday: meter.read_energy(EnergyPeriod::Yesterday, ALL_TARIFFS)?,
        energy_today: meter.read_energy(EnergyPeriod::Today, ALL_TARIFFS)?,
    };

    meter.close()?;
    info!("power meter session completed");

    Ok(Poll {
        state: meter.state(),
        measurements,
    })
}
