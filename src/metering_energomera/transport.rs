use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use log::{debug, error};
use serialport::{DataBits, Parity, SerialPort, StopBits};
use thiserror::Error;

pub const DEFAULT_BAUD_RATE: u32 = 9600;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Transport is not open")]
    NotOpen,
}

/// Byte level access to the half duplex line the meter hangs on
pub trait Transport {
    fn open(&mut self) -> Result<(), TransportError>;
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;
    /// Returns up to `max_len` bytes; fewer (or none) when `timeout` expires first
    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;
    fn close(&mut self);
}

pub struct SerialTransport {
    path: String,
    baud_rate: u32,
    timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("path", &self.path)
            .field("baud_rate", &self.baud_rate)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl SerialTransport {
    pub fn new(path: &str, baud_rate: u32, timeout: Duration) -> Self {
        return SerialTransport {
            path: path.to_string(),
            baud_rate,
            timeout,
            port: None,
        };
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        /* Start every session on a fresh handle, the meter does not like leftovers */
        if self.port.is_some() {
            self.close();
        }

        debug!("Opening serial port {} with {} 7E1", self.path, self.baud_rate);
        let port = serialport::new(&self.path, self.baud_rate)
            .data_bits(DataBits::Seven)
            .parity(Parity::Even)
            .stop_bits(StopBits::One)
            .timeout(self.timeout)
            .open()
            .map_err(|e| {
                error!("Error opening serial port {}: {}", self.path, e);
                e
            })?;

        self.port = Some(port);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
        let mut received = Vec::with_capacity(max_len);
        let mut buf = [0u8; 64];
        let deadline = Instant::now() + timeout;

        while received.len() < max_len {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            port.set_timeout(deadline - now)?;

            let want = std::cmp::min(buf.len(), max_len - received.len());
            match port.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(ref e) if e.kind() == ErrorKind::TimedOut => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(received)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Serial port {} closed", self.path);
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;

    /// In memory meter: answers every known request frame with a scripted reply
    #[derive(Default)]
    pub struct ScriptedTransport {
        pub replies: HashMap<Vec<u8>, Vec<u8>>,
        pub written: Vec<Vec<u8>>,
        pub opens: usize,
        pub closes: usize,
        pub fail_open: bool,
        /* Write that fails with an I/O error, counted from 1 */
        pub fail_on_write: Option<usize>,
        pending: Vec<u8>,
        is_open: bool,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            return ScriptedTransport::default();
        }

        pub fn reply(mut self, request: &[u8], response: &[u8]) -> Self {
            self.replies.insert(request.to_vec(), response.to_vec());
            return self;
        }

        pub fn count_written(&self, frame: &[u8]) -> usize {
            return self.written.iter().filter(|w| w.as_slice() == frame).count();
        }
    }

    impl Transport for ScriptedTransport {
        fn open(&mut self) -> Result<(), TransportError> {
            if self.fail_open {
                return Err(TransportError::Io(std::io::Error::new(ErrorKind::NotFound, "no such device")));
            }
            self.opens += 1;
            self.is_open = true;
            Ok(())
        }

        fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
            if !self.is_open {
                return Err(TransportError::NotOpen);
            }
            self.written.push(data.to_vec());
            if self.fail_on_write == Some(self.written.len()) {
                return Err(TransportError::Io(std::io::Error::new(ErrorKind::BrokenPipe, "cable pulled")));
            }
            self.pending = self.replies.get(data).cloned().unwrap_or_default();
            Ok(())
        }

        fn read(&mut self, max_len: usize, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
            if !self.is_open {
                return Err(TransportError::NotOpen);
            }
            let n = std::cmp::min(max_len, self.pending.len());
            let out: Vec<u8> = self.pending.drain(..n).collect();
            Ok(out)
        }

        fn close(&mut self) {
            if self.is_open {
                self.closes += 1;
                self.is_open = false;
            }
        }
    }
}
