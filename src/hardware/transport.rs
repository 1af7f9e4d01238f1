//! Blocking bus transport abstraction.
//!
//! VISA I/O is synchronous and cannot be interrupted once started, so the
//! transport is a plain blocking trait. The dispatcher runs every call on
//! Tokio's blocking pool, one at a time per session.

use std::time::Duration;

use crate::error::TransportError;

/// Line terminator appended to every command.
pub const LINE_TERMINATOR: &str = "\n";

/// Most digits the `<len>` field of a definite-length block may have.
pub const MAX_BLOCK_LENGTH_DIGITS: usize = 9;

/// Message-based connection to one instrument.
pub trait Transport: Send + 'static {
    /// Write raw bytes to the instrument.
    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read one response line, without its terminator.
    fn read_line(&mut self) -> Result<String, TransportError>;

    /// Release the underlying resource.
    fn close(&mut self) -> Result<(), TransportError>;

    /// Write a command followed by [`LINE_TERMINATOR`].
    fn write_line(&mut self, command: &str) -> Result<(), TransportError> {
        let mut line = String::with_capacity(command.len() + LINE_TERMINATOR.len());
        line.push_str(command);
        line.push_str(LINE_TERMINATOR);
        self.write_raw(line.as_bytes())
    }

    /// Write `header` followed by `payload` as an IEEE 488.2 definite-length block.
    fn write_block(&mut self, header: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.write_raw(&frame_ieee_block(header, payload)?)
    }
}

/// Opens transports for resource addresses.
pub trait Connector: Send + Sync {
    /// Open `address` in no-lock access mode with the given I/O timeout.
    fn open(&self, address: &str, timeout: Duration) -> Result<Box<dyn Transport>, TransportError>;
}

/// `#<n><len>` prefix of a definite-length block carrying `len` bytes.
///
/// # Errors
/// `BlockTooLarge` if `len` needs more than [`MAX_BLOCK_LENGTH_DIGITS`] digits.
pub fn block_length_prefix(len: usize) -> Result<String, TransportError> {
    let digits = len.to_string();
    if digits.len() > MAX_BLOCK_LENGTH_DIGITS {
        return Err(TransportError::BlockTooLarge { len });
    }
    Ok(format!("#{}{}", digits.len(), digits))
}

/// `<header>#<n><len><payload>\n`, where `<n>` is the digit count of `<len>`.
pub fn frame_ieee_block(header: &str, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    let prefix = block_length_prefix(payload.len())?;
    let mut frame =
        Vec::with_capacity(header.len() + prefix.len() + payload.len() + LINE_TERMINATOR.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(prefix.as_bytes());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(LINE_TERMINATOR.as_bytes());
    Ok(frame)
}
