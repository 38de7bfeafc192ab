//! Line-oriented serial channel to the ASCII MDB bridge.

use std::io::{Read, Write};
use std::{thread, time};

use serialport::TTYPort;

use crate::{Error, Result};

/// Pause after each write to let USB-serial bridges drain (milliseconds).
const WRITE_DRAIN_MS: u64 = 20;
/// Serial read timeout (milliseconds).
const READ_TIMEOUT_MS: u64 = 1_000;

/// A half-duplex line channel.
///
/// The controller issues one `write_line` and then one or more `read_line`
/// calls per logical exchange. Reads return the empty string on timeout
/// rather than failing, so a silent device never wedges a caller.
pub trait Link: Send {
    /// Sends a single command line; the implementation adds the framing.
    fn write_line(&mut self, line: &str) -> Result<()>;

    /// Reads one response line, stripped of framing whitespace.
    ///
    /// Returns the empty string when the read times out.
    fn read_line(&mut self) -> Result<String>;

    /// Closes the channel. Idempotent.
    fn close(&mut self);
}

/// [Link] over a real serial port.
///
/// ```no_run
/// # fn main() -> mdb_server::Result<()> {
/// let _link = mdb_server::SerialLink::open("/dev/ttyUSB0", 115_200)?;
/// # Ok(())
/// # }
/// ```
pub struct SerialLink {
    port: Option<TTYPort>,
}

impl SerialLink {
    /// Opens the serial device with the bridge's line settings (8N1).
    pub fn open(serial_path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(serial_path, baud_rate)
            .flow_control(serialport::FlowControl::None)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(time::Duration::from_millis(READ_TIMEOUT_MS))
            .open_native()?;

        Ok(Self { port: Some(port) })
    }

    fn port(&mut self) -> Result<&mut TTYPort> {
        self.port.as_mut().ok_or(Error::Closed)
    }
}

impl Link for SerialLink {
    fn write_line(&mut self, line: &str) -> Result<()> {
        let port = self.port()?;

        port.write_all(line.as_bytes())?;
        port.write_all(b"\r")?;
        port.flush()?;

        // Let the USB-serial bridge drain before the next exchange.
        thread::sleep(time::Duration::from_millis(WRITE_DRAIN_MS));

        Ok(())
    }

    fn read_line(&mut self) -> Result<String> {
        let port = self.port()?;

        let mut buf = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            match port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => match byte[0] {
                    // Leading framing left over from the previous line.
                    b'\r' | b'\n' if buf.is_empty() => continue,
                    b'\r' | b'\n' => break,
                    b => buf.push(b),
                },
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {
                    // A stalled, unterminated line is a timeout, not a
                    // response.
                    if !buf.is_empty() {
                        log::warn!(
                            "Discarding {} unterminated bytes after read timeout",
                            buf.len()
                        );
                        buf.clear();
                    }
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(String::from_utf8_lossy(&buf).trim().to_string())
    }

    fn close(&mut self) {
        self.port = None;
    }
}
