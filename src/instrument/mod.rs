//! Instrument control facade.

pub mod awg8195a;
pub mod scpi;

pub use awg8195a::{AmplitudeSetting, Awg8195a, MAX_AMPLITUDE, MAX_ERROR_QUEUE_DRAIN, MIN_AMPLITUDE};
