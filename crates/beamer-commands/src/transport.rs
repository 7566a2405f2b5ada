//! Byte-stream transport seam.

use std::io;

use crate::command::Command;
use crate::framer::DELIMITER;

/// A duplex byte stream to the projector.
///
/// Implementations must bound every read by a timeout and report an expired
/// timeout as `Ok(0)`. Any `Err` is treated as fatal by the dispatcher.
pub trait Transport: Send {
    /// Read whatever bytes are available, waiting at most the read timeout.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all bytes.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_all(bytes)
    }
}

/// Wire bytes of a command: the opcode followed by the delimiter.
pub fn encode(command: &Command) -> Vec<u8> {
    let mut frame = Vec::with_capacity(command.opcode.len() + 1);
    frame.extend_from_slice(command.opcode.as_bytes());
    frame.push(DELIMITER);
    frame
}
