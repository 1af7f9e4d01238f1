//! Error types for the AWG control layer.
//!
//! Each layer owns its own `thiserror` enum so callers can match on exactly
//! the failures a given operation can produce:
//!
//! - **`TransportError`**: raw bus I/O failures reported by a [`Transport`].
//! - **`ConnectError`**: the bus resource could not be opened. The facade is
//!   left without a session.
//! - **`DispatchError`**: a command could not be delivered or answered
//!   (`NotConnected`, `Timeout`, transport failure, malformed response).
//! - **`ValidationError`**: waveform data violates the instrument's sample
//!   rate, granularity or minimum length constraints. Raised before any
//!   device traffic.
//! - **`SequenceError`**: a sequence-table entry violates an instrument bound.
//! - **`AwgError`**: the union returned by the instrument facade, created
//!   from the layer errors with `?`.
//!
//! [`Transport`]: crate::hardware::Transport

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the facade error type.
pub type AwgResult<T> = std::result::Result<T, AwgError>;

/// Failure reported by the underlying bus transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Bus read/write/open failure, with the driver's message
    #[error("I/O error: {0}")]
    Io(String),

    /// Call on a transport that has already been closed
    #[error("Transport already closed")]
    Closed,

    /// Support for this bus was not compiled in
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// Payload length needs more digits than a definite-length block allows
    #[error("Binary block of {len} bytes does not fit a 9-digit length field")]
    BlockTooLarge {
        /// Payload length in bytes
        len: usize,
    },
}

/// The bus resource at `address` could not be opened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to connect to {address}: {source}")]
pub struct ConnectError {
    /// Resource locator that was being opened
    pub address: String,
    /// Low-level cause
    #[source]
    pub source: TransportError,
}

/// Failure of a single dispatcher call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No session, or the session has been closed. No transport call was made.
    #[error("Connection to AWG is not established")]
    NotConnected,

    /// The per-call deadline expired. The transport call may still be running,
    /// so the instrument state is unverified until re-queried.
    #[error("Command timed out after {timeout:?}: {command}")]
    Timeout {
        /// Command that did not complete
        command: String,
        /// Deadline that expired
        timeout: Duration,
    },

    /// The bus call itself failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A query answer could not be parsed
    #[error("Malformed response to '{command}': {response:?}")]
    MalformedResponse {
        /// Query that was sent
        command: String,
        /// Response line as received
        response: String,
    },

    /// The session's queue task is gone (closed concurrently or panicked).
    #[error("Session command queue closed")]
    SessionClosed,

    /// The instrument kept reporting errors past the drain limit.
    #[error("Error queue still not empty after {limit} entries")]
    ErrorQueueOverflow {
        /// Entries read before giving up
        limit: usize,
    },
}

/// Waveform data does not satisfy the instrument constraints.
#[derive(Error, Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum ValidationError {
    /// Arrays of different length; checked before anything else.
    #[error("Time and voltage arrays differ in length ({times} vs {voltages})")]
    LengthMismatch { times: usize, voltages: usize },

    /// Spacing of the first two time samples is off by more than 1%.
    #[error("Sample spacing {measured:e} s does not match the AWG sample period {expected:e} s (64 GSa/s)")]
    SampleRateMismatch { measured: f64, expected: f64 },

    /// Length is not a multiple of 256.
    #[error("Sample count {len} is not a multiple of the granularity {granularity}")]
    GranularityViolation { len: usize, granularity: usize },

    /// Length is below 1280.
    #[error("Sample count {len} is below the minimum of {minimum}")]
    TooFewSamples { len: usize, minimum: usize },
}

/// A sequence-table entry violates an instrument bound.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    /// Idle entries must last at least 2560 samples
    #[error("Idle delay {delay} is below the minimum of {minimum} samples")]
    IdleDelayTooShort {
        /// Requested delay in samples
        delay: u32,
        /// Smallest accepted delay
        minimum: u32,
    },
}

/// One non-zero entry drained from the instrument's error queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentError {
    /// Numeric SCPI error code (never 0)
    pub code: i32,
    /// Message text without surrounding quotes
    pub message: String,
    /// Response line exactly as received
    pub raw: String,
}

impl InstrumentError {
    /// Parse a `SYSTem:ERRor?` response of the form `<code>,<message>`.
    ///
    /// Returns the code and, for non-zero codes, the error record.
    /// `None` if the code field is not an integer.
    pub fn parse(raw: &str) -> Option<(i32, Option<Self>)> {
        let line = raw.trim();
        let (code_field, message) = match line.split_once(',') {
            Some((code, message)) => (code, message),
            None => (line, ""),
        };
        let code = code_field.trim().parse::<i32>().ok()?;
        if code == 0 {
            return Some((0, None));
        }
        Some((
            code,
            Some(Self {
                code,
                message: message.trim().trim_matches('"').to_string(),
                raw: line.to_string(),
            }),
        ))
    }
}

impl fmt::Display for InstrumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.code, self.message)
    }
}

fn join_errors(errors: &[InstrumentError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error returned by [`Awg8195a`](crate::instrument::Awg8195a) operations.
#[derive(Error, Debug)]
pub enum AwgError {
    /// Opening the session failed
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// A step of the operation could not be delivered or answered
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Waveform rejected before any device traffic
    #[error("Invalid waveform data: {0}")]
    Validation(#[from] ValidationError),

    /// Sequence entry rejected before any device traffic
    #[error("Invalid sequence entry: {0}")]
    Sequence(#[from] SequenceError),

    /// Generation was not started because the error queue was not empty
    #[error("Instrument reported {} error(s): {}", .0.len(), join_errors(.0))]
    InstrumentErrors(Vec<InstrumentError>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DispatchError::NotConnected;
        assert_eq!(err.to_string(), "Connection to AWG is not established");
    }

    #[test]
    fn test_parse_no_error() {
        let (code, record) = InstrumentError::parse("0,\"No error\"\n").unwrap();
        assert_eq!(code, 0);
        assert!(record.is_none());
    }

    #[test]
    fn test_parse_error_with_commas_in_message() {
        let (code, record) =
            InstrumentError::parse("-222,\"Data out of range; value 2,5 clipped\"").unwrap();
        let record = record.unwrap();
        assert_eq!(code, -222);
        assert_eq!(record.message, "Data out of range; value 2,5 clipped");
        assert_eq!(record.to_string(), "-222,Data out of range; value 2,5 clipped");
    }

    #[test]
    fn test_parse_rejects_non_numeric_code() {
        assert!(InstrumentError::parse("garbage").is_none());
        assert!(InstrumentError::parse("").is_none());
    }

    #[test]
    fn test_instrument_errors_display() {
        let err = AwgError::InstrumentErrors(vec![
            InstrumentError::parse("1,overrange").unwrap().1.unwrap(),
            InstrumentError::parse("-100,Command error").unwrap().1.unwrap(),
        ]);
        assert_eq!(
            err.to_string(),
            "Instrument reported 2 error(s): 1,overrange; -100,Command error"
        );
    }
}
