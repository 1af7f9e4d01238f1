//! Control layer for the Keysight M8195A arbitrary waveform generator.
//!
//! This library drives the AWG over SCPI on a VISA session. It validates and
//! quantizes waveform data, encodes sequence-table entries, and serializes
//! all traffic for one instrument through a single command queue.
//!
//! - [`waveform`]: sample-rate/granularity/length checks and 8-bit quantization
//! - [`sequence`]: sequence-table data and idle entries, control markers
//! - [`hardware`]: transports, the command dispatcher, session lifecycle
//! - [`instrument`]: the [`Awg8195a`](instrument::Awg8195a) facade
//! - [`config`]: Figment-based configuration
//!
//! # Features
//!
//! - `instrument_visa` - Enable real VISA communication via visa-rs

pub mod config;
pub mod error;
pub mod hardware;
pub mod instrument;
pub mod sequence;
pub mod waveform;

pub use config::AwgConfig;
pub use error::{AwgError, AwgResult};
pub use instrument::Awg8195a;
