use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockWriteGuard, TryLockError};

use super::{Device, DeviceInfo, Direction};

/// A byte-wide port that reads from an input buffer and writes to an output buffer.
///
/// The host feeds input and collects output through the shared buffers
/// ([`BufferedPort::get_input`] and [`BufferedPort::get_output`]). Any sense
/// line wired to the port reads as "input ready".
///
/// Note that while the host holds a lock on one of the buffers, the CPU
/// sees that buffer as empty (for input) or drops writes to it (for output).
#[derive(Debug, Clone)]
pub struct BufferedPort {
    info: DeviceInfo,
    input: Arc<RwLock<VecDeque<u8>>>,
    output: Arc<RwLock<Vec<u8>>>,
}
impl BufferedPort {
    /// Creates a port on `port` with fresh, empty buffers.
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self::with_buffers(name, port, Default::default(), Default::default())
    }

    /// Creates a port wrapped around existing buffers.
    pub fn with_buffers(name: impl Into<String>, port: u16, input: Arc<RwLock<VecDeque<u8>>>, output: Arc<RwLock<Vec<u8>>>) -> Self {
        let info = DeviceInfo::new(name, "buffered port", Direction::InOut, port, 1)
            .with_description("byte port backed by host buffers");
        Self { info, input, output }
    }

    /// Gets a reference to the input buffer.
    pub fn get_input(&self) -> &Arc<RwLock<VecDeque<u8>>> {
        &self.input
    }

    /// Gets a reference to the output buffer.
    pub fn get_output(&self) -> &Arc<RwLock<Vec<u8>>> {
        &self.output
    }

    fn try_input(&self) -> Option<RwLockWriteGuard<'_, VecDeque<u8>>> {
        match self.input.try_write() {
            Ok(g) => Some(g),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    fn try_output(&self) -> Option<RwLockWriteGuard<'_, Vec<u8>>> {
        match self.output.try_write() {
            Ok(g) => Some(g),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Whether input is waiting.
    pub fn ready(&self) -> bool {
        self.try_input().is_some_and(|buf| !buf.is_empty())
    }
}
impl Device for BufferedPort {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Takes the next input byte. An empty buffer reads as zero.
    fn dev_read(&mut self, _port: u16) -> u16 {
        self.try_input()
            .and_then(|mut buf| buf.pop_front())
            .map_or(0, u16::from)
    }

    fn dev_write(&mut self, _port: u16, data: u16) {
        match self.try_output() {
            Some(mut buf) => buf.push(data as u8),
            None => tracing::warn!(device = %self.info.name, data, "output buffer busy, byte dropped"),
        }
    }

    /// Discards pending input. Output already written stays for the host to collect.
    fn clear_device(&mut self) {
        if let Some(mut buf) = self.try_input() {
            buf.clear();
        }
    }

    fn get_sense(&mut self, _line: u16, _default: bool) -> bool {
        self.ready()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_buffered_port() {
        let mut port = BufferedPort::new("TTY", 1);
        port.get_input().write().unwrap().extend(b"hi");

        assert!(port.get_sense(1, false));
        assert_eq!(port.dev_read(1), u16::from(b'h'));
        assert_eq!(port.dev_read(1), u16::from(b'i'));
        assert!(!port.get_sense(1, true));
        assert_eq!(port.dev_read(1), 0);

        port.dev_write(1, 0x141);
        assert_eq!(*port.get_output().read().unwrap(), b"A");

        port.get_input().write().unwrap().extend(b"xyz");
        port.clear_device();
        port.clear_device();
        assert!(!port.ready());
        assert_eq!(*port.get_output().read().unwrap(), b"A");
    }
}
