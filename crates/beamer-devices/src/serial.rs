//! Serial transport to the projector.
//!
//! Reads are bounded by the port timeout; an expired timeout is reported to
//! the dispatcher as an empty read so that it can run its idle work.

use std::io::{self, Read, Write};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use beamer_commands::Transport;

/// Serial port configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path
    pub device: String,
    /// Baud rate
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
        }
    }
}

impl SerialConfig {
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.device.trim().is_empty() {
            return Err(TransportError::Configuration(
                "serial device path is empty".into(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(TransportError::Configuration("baud rate must be positive".into()));
        }
        Ok(())
    }
}

/// Transport error types.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to open serial port {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: serialport::Error,
    },
}

/// Byte stream transport over any timed reader/writer.
///
/// Timeouts surface as `Ok(0)`; all other I/O errors are passed through.
pub struct SerialTransport<S = Box<dyn serialport::SerialPort>> {
    port: S,
}

impl SerialTransport {
    /// Open the configured serial port with the given read timeout.
    pub fn open(config: &SerialConfig, read_timeout: Duration) -> Result<Self, TransportError> {
        config.validate()?;

        let port = serialport::new(config.device.as_str(), config.baud_rate)
            .timeout(read_timeout)
            .open()
            .map_err(|source| TransportError::Open {
                device: config.device.clone(),
                source,
            })?;

        info!(
            "Opened serial port {} at {} baud",
            config.device, config.baud_rate
        );
        Ok(Self { port })
    }
}

impl<S: Read + Write + Send> SerialTransport<S> {
    /// Wrap an already opened stream.
    pub fn from_port(port: S) -> Self {
        Self { port }
    }

    pub fn get_ref(&self) -> &S {
        &self.port
    }

    pub fn into_inner(self) -> S {
        self.port
    }
}

impl<S: Read + Write + Send> Transport for SerialTransport<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Stream replaying scripted read results.
    #[derive(Default)]
    struct ScriptedPort {
        reads: VecDeque<io::Result<Vec<u8>>>,
        written: Vec<u8>,
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
            }
        }
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_timeout_reads_as_empty() {
        let mut transport = SerialTransport::from_port(ScriptedPort::default());
        let mut buf = [0u8; 8];
        assert_eq!(Transport::read(&mut transport, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_data_passes_through() {
        let mut port = ScriptedPort::default();
        port.reads.push_back(Ok(b"*000\r".to_vec()));
        let mut transport = SerialTransport::from_port(port);

        let mut buf = [0u8; 8];
        let n = Transport::read(&mut transport, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"*000\r");
    }

    #[test]
    fn test_fatal_error_propagates() {
        let mut port = ScriptedPort::default();
        port.reads.push_back(Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "device disconnected",
        )));
        let mut transport = SerialTransport::from_port(port);

        let mut buf = [0u8; 8];
        let err = Transport::read(&mut transport, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_write_sends_all_bytes() {
        let mut transport = SerialTransport::from_port(ScriptedPort::default());
        Transport::write_all(&mut transport, b"* 0 Lamp ?\r").unwrap();
        assert_eq!(transport.into_inner().written, b"* 0 Lamp ?\r".to_vec());
    }

    #[test]
    fn test_serial_config_validation() {
        assert!(SerialConfig::default().validate().is_ok());

        let config = SerialConfig {
            device: " ".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TransportError::Configuration(_))
        ));
    }
}
