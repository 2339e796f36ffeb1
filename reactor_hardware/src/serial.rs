//! Real serial port transport (4800 baud, 7 data bits, odd parity, 1 stop bit).

use std::io::{Read, Write};
use std::time::Duration;

use reactor_traits::Transport;

use crate::error::{HwError, Result};

pub const BAUD: u32 = 4800;

pub struct SerialPortTransport {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
}

impl SerialPortTransport {
    pub fn open(name: &str, timeout: Duration) -> Result<Self> {
        let port = serialport::new(name, BAUD)
            .data_bits(serialport::DataBits::Seven)
            .parity(serialport::Parity::Odd)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| HwError::Serial(format!("open {name}: {e}")))?;
        tracing::info!(port = name, baud = BAUD, "serial port opened");
        Ok(Self {
            port: Some(port),
            name: name.to_string(),
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port.as_mut().ok_or(HwError::Closed)
    }
}

impl std::fmt::Debug for SerialPortTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPortTransport")
            .field("name", &self.name)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl Transport for SerialPortTransport {
    fn write(&mut self, bytes: &[u8]) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let port = self.port()?;
        port.write_all(bytes).map_err(HwError::from)?;
        port.flush().map_err(HwError::from)?;
        Ok(())
    }

    /// Read until `max` bytes arrive or the line stays quiet for the port timeout.
    fn read(&mut self, max: usize) -> std::result::Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
        let port = self.port()?;
        let mut buf = vec![0u8; max];
        let mut filled = 0;
        while filled < max {
            match port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(Box::new(HwError::Io(e))),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn close(&mut self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.port.take().is_some() {
            tracing::info!(port = %self.name, "serial port closed");
        }
        Ok(())
    }
}

/// Names of the serial ports visible on this host.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports().map_err(|e| HwError::Serial(e.to_string()))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
