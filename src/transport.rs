//! Byte-stream plumbing between the session and the RS485 dongle.

use std::io::{self, Read, Write};
use std::time::Duration;

use log::{debug, info};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::errors::Result;

/// Default dongle device node.
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Line speed the meter ships with.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Timeout applied to the port between reads.
const IDLE_TIMEOUT: Duration = Duration::from_millis(100);

/// What the session needs from the line: a write and a bounded read.
pub trait Transport {
    /// Write `bytes`, returning how many were accepted.
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize>;

    /// Wait up to `timeout` for data and return what arrived (at most `max_bytes`).
    /// An empty vector means nothing arrived in time.
    fn read_with_timeout(&mut self, max_bytes: usize, timeout: Duration) -> io::Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        (**self).write(bytes)
    }

    fn read_with_timeout(&mut self, max_bytes: usize, timeout: Duration) -> io::Result<Vec<u8>> {
        (**self).read_with_timeout(max_bytes, timeout)
    }
}

/// Serial line parameters. The meter speaks 8N1 without flow control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub path: String,
    pub baud_rate: u32,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            path: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// [`Transport`] over a raw serial port. The port is closed when this is dropped.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open and configure the serial port.
    pub fn open(settings: &SerialSettings) -> Result<Self> {
        let port = serialport::new(&settings.path, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(IDLE_TIMEOUT)
            .open()?;

        info!(
            "serial port opened: path={}, baud={}",
            settings.path, settings.baud_rate
        );
        Ok(Self { port })
    }

    /// Wrap an already-open port.
    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let written = self.port.write(bytes)?;
        self.port.flush()?;
        Ok(written)
    }

    fn read_with_timeout(&mut self, max_bytes: usize, timeout: Duration) -> io::Result<Vec<u8>> {
        timed_read(&mut self.port, max_bytes, timeout)
    }
}

/// The slice of a serial port the bounded read needs.
trait TimedPort: Read {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;
    fn pending(&mut self) -> io::Result<usize>;
}

impl TimedPort for Box<dyn SerialPort> {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_timeout(timeout).map_err(io::Error::from)
    }

    fn pending(&mut self) -> io::Result<usize> {
        Ok(self.bytes_to_read().map_err(io::Error::from)? as usize)
    }
}

/// Read under `timeout`, then put the port back on `IDLE_TIMEOUT` whatever happened.
fn timed_read<P: TimedPort>(
    port: &mut P,
    max_bytes: usize,
    timeout: Duration,
) -> io::Result<Vec<u8>> {
    port.set_read_timeout(timeout)?;
    let result = read_available(port, max_bytes);
    let restored = port.set_read_timeout(IDLE_TIMEOUT);
    let data = result?;
    restored?;
    Ok(data)
}

/// One blocking read under the current timeout, topped up with whatever
/// else is already buffered.
fn read_available<P: TimedPort>(port: &mut P, max_bytes: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; max_bytes];
    let mut filled = match port.read(&mut buf) {
        Ok(n) => n,
        Err(e) if is_timeout(&e) => 0,
        Err(e) => return Err(e),
    };

    while filled > 0 && filled < max_bytes {
        let pending = port.pending()?;
        if pending == 0 {
            break;
        }
        let end = (filled + pending).min(max_bytes);
        match port.read(&mut buf[filled..end]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if is_timeout(&e) => break,
            Err(e) => return Err(e),
        }
    }

    buf.truncate(filled);
    Ok(buf)
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        debug!(
            "closing serial port {}",
            self.port.name().unwrap_or_else(|| "<unnamed>".into())
        );
    }
}
