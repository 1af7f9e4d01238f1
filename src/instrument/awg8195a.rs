//! Keysight M8195A arbitrary waveform generator.
//!
//! [`Awg8195a`] owns at most one [`Session`] and exposes one async method per
//! SCPI operation, plus the composite sequences used to bring the instrument
//! up, load a waveform, and start generation. Every step of a composite
//! sequence goes through the session's dispatcher; the first failing step
//! aborts the sequence and its error is returned.
//!
//! ## Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use awg_supervision::hardware::VisaConnector;
//! use awg_supervision::instrument::Awg8195a;
//!
//! # async fn example(times: Vec<f64>, voltages: Vec<f64>) -> awg_supervision::error::AwgResult<()> {
//! let mut awg = Awg8195a::new(Arc::new(VisaConnector::new()));
//! awg.connect_and_reset("TCPIP0::localhost::hislip0::INSTR", 1).await?;
//! awg.load_waveform(&times, &voltages, 1, 1).await?;
//! awg.set_output_amplitude(1, 0.5).await?;
//! awg.start_signal_generation(1, 1).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::scpi;
use crate::error::{AwgError, AwgResult, ConnectError, DispatchError, InstrumentError};
use crate::hardware::{Connector, Session, DEFAULT_TIMEOUT_MS};
use crate::sequence::{ControlMarker, IdleEntry, SequenceTableEntry};
use crate::waveform::{self, QuantizedWaveform};

/// Lowest accepted output amplitude in volts.
pub const MIN_AMPLITUDE: f64 = 0.075;

/// Highest accepted output amplitude in volts.
pub const MAX_AMPLITUDE: f64 = 1.0;

/// Stop draining the error queue after this many non-zero entries.
pub const MAX_ERROR_QUEUE_DRAIN: usize = 256;

/// Outcome of an amplitude request.
///
/// Out-of-range requests are not rejected: the lower bound is applied instead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmplitudeSetting {
    /// Value the caller asked for
    pub requested: f64,
    /// Value sent to the instrument
    pub applied: f64,
    /// True if `applied` differs from `requested`
    pub coerced: bool,
}

impl AmplitudeSetting {
    /// Replace anything outside [`MIN_AMPLITUDE`, `MAX_AMPLITUDE`] (including NaN)
    /// with `MIN_AMPLITUDE`.
    pub fn coerce(requested: f64) -> Self {
        if (MIN_AMPLITUDE..=MAX_AMPLITUDE).contains(&requested) {
            Self {
                requested,
                applied: requested,
                coerced: false,
            }
        } else {
            Self {
                requested,
                applied: MIN_AMPLITUDE,
                coerced: true,
            }
        }
    }
}

/// Control facade for one M8195A.
pub struct Awg8195a {
    connector: Arc<dyn Connector>,
    timeout: Duration,
    session: Option<Session>,
}

impl Awg8195a {
    /// Create a disconnected facade using the default 3000 ms call timeout
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            session: None,
        }
    }

    /// Set the per-call timeout used by future connections
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True while a session is open
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_connected)
    }

    /// Address of the current session, if any
    pub fn address(&self) -> Option<&str> {
        self.session.as_ref().map(Session::address)
    }

    /// Current session, or `NotConnected`
    pub fn session(&self) -> Result<&Session, DispatchError> {
        self.session.as_ref().ok_or(DispatchError::NotConnected)
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Open a session to `address`, replacing any existing one.
    ///
    /// The old session is closed before the new one is opened. On failure the
    /// facade is left disconnected.
    pub async fn connect(&mut self, address: &str) -> Result<(), ConnectError> {
        self.close().await;
        let session = Session::connect(Arc::clone(&self.connector), address, self.timeout).await?;
        self.session = Some(session);
        Ok(())
    }

    /// Release the session. Safe to call when never connected.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }

    /// Query the instrument identity string
    pub async fn identity(&self) -> Result<String, DispatchError> {
        self.session()?.identity().await
    }

    async fn send(&self, command: String) -> Result<(), DispatchError> {
        self.session()?.dispatch(command).await
    }

    // ========================================================================
    // Single-command operations
    // ========================================================================

    /// Reset the instrument (`*RST`)
    pub async fn reset(&self) -> Result<(), DispatchError> {
        self.send(scpi::RESET.to_string()).await
    }

    /// Start signal generation
    pub async fn start_generation(&self) -> Result<(), DispatchError> {
        self.send(scpi::START.to_string()).await
    }

    /// Stop signal generation
    pub async fn stop_generation(&self) -> Result<(), DispatchError> {
        self.send(scpi::STOP.to_string()).await
    }

    /// Delete all segments of a channel
    pub async fn clear_waveform_memory(&self, channel: u32) -> Result<(), DispatchError> {
        self.send(scpi::clear_memory(channel)).await
    }

    /// Switch a channel's waveform memory to extended mode
    pub async fn set_memory_extended(&self, channel: u32) -> Result<(), DispatchError> {
        self.send(scpi::extended_memory(channel)).await
    }

    /// Enable marker outputs
    pub async fn set_marker_mode(&self) -> Result<(), DispatchError> {
        self.send(scpi::MARKER_MODE.to_string()).await
    }

    /// Play from the sequence table
    pub async fn set_sequence_mode(&self) -> Result<(), DispatchError> {
        self.send(scpi::SEQUENCE_MODE.to_string()).await
    }

    /// Switch a channel's output amplifier on or off
    pub async fn set_output(&self, channel: u32, on: bool) -> Result<(), DispatchError> {
        self.send(scpi::output(channel, on)).await
    }

    /// Segment played immediately after generation starts
    pub async fn select_segment(&self, channel: u32, segment: u32) -> Result<(), DispatchError> {
        self.send(scpi::select_segment(channel, segment)).await
    }

    /// Advance through the sequence automatically
    pub async fn set_advancement_auto(&self) -> Result<(), DispatchError> {
        self.send(scpi::ADVANCE_AUTO.to_string()).await
    }

    /// Run in triggered mode (continuous off)
    pub async fn set_triggered_mode(&self) -> Result<(), DispatchError> {
        self.send(scpi::TRIGGERED_MODE.to_string()).await
    }

    /// Use the internal trigger generator
    pub async fn set_internal_trigger(&self) -> Result<(), DispatchError> {
        self.send(scpi::INTERNAL_TRIGGER.to_string()).await
    }

    /// Internal trigger frequency in Hz
    pub async fn set_trigger_frequency(&self, hz: f64) -> Result<(), DispatchError> {
        self.send(scpi::trigger_frequency(hz)).await
    }

    /// Set the output amplitude in volts.
    ///
    /// Values outside [0.075, 1.0] V are replaced by 0.075 V and logged; the
    /// returned [`AmplitudeSetting`] reports what was applied. `_channel` is
    /// accepted for symmetry with the other channel operations, but `:VOLT`
    /// addresses the instrument's default channel.
    pub async fn set_output_amplitude(
        &self,
        _channel: u32,
        volts: f64,
    ) -> Result<AmplitudeSetting, DispatchError> {
        let setting = AmplitudeSetting::coerce(volts);
        if setting.coerced {
            warn!(
                requested = volts,
                applied = setting.applied,
                "Amplitude outside [{}, {}] V, using lower bound",
                MIN_AMPLITUDE,
                MAX_AMPLITUDE
            );
        }
        self.send(scpi::amplitude(setting.applied)).await?;
        Ok(setting)
    }

    /// Write one sequence-table row
    pub async fn write_sequence_entry(
        &self,
        entry: impl Into<SequenceTableEntry>,
    ) -> Result<(), DispatchError> {
        self.send(entry.into().to_command()).await
    }

    /// Build an idle row and write it to the sequence table.
    ///
    /// # Errors
    /// `Sequence` if `idle_delay` is below the minimum; nothing is sent then.
    pub async fn write_idle_entry(
        &self,
        slot: u32,
        markers: ControlMarker,
        sequence_loop_count: u32,
        idle_sample: i8,
        idle_delay: u32,
    ) -> AwgResult<()> {
        let entry = IdleEntry::new(slot, markers, sequence_loop_count, idle_sample, idle_delay)?;
        self.write_sequence_entry(entry).await?;
        Ok(())
    }

    // ========================================================================
    // Error queue
    // ========================================================================

    /// Read `SYSTem:ERRor?` until the instrument answers with code 0.
    ///
    /// Returns the non-zero entries in the order they were read.
    ///
    /// # Errors
    /// - `MalformedResponse` if a response has no integer code
    /// - `ErrorQueueOverflow` after [`MAX_ERROR_QUEUE_DRAIN`] non-zero entries
    /// - any dispatch error of the underlying queries
    pub async fn drain_errors(&self) -> Result<Vec<InstrumentError>, DispatchError> {
        let session = self.session()?;
        let mut errors = Vec::new();

        loop {
            if errors.len() >= MAX_ERROR_QUEUE_DRAIN {
                return Err(DispatchError::ErrorQueueOverflow {
                    limit: MAX_ERROR_QUEUE_DRAIN,
                });
            }

            let response = session.dispatch_query(scpi::ERROR_QUERY).await?;
            match InstrumentError::parse(&response) {
                Some((_, Some(error))) => {
                    warn!(code = error.code, message = %error.message, "AWG reported error");
                    errors.push(error);
                }
                Some((_, None)) => break,
                None => {
                    return Err(DispatchError::MalformedResponse {
                        command: scpi::ERROR_QUERY.to_string(),
                        response,
                    })
                }
            }
        }

        Ok(errors)
    }

    /// True if the error queue was empty
    pub async fn check_error_state(&self) -> Result<bool, DispatchError> {
        Ok(self.drain_errors().await?.is_empty())
    }

    // ========================================================================
    // Composite sequences
    // ========================================================================

    /// Connect, then put the instrument into a known state for `channel`:
    /// stopped, reset, extended memory, memory cleared, output on, internal
    /// trigger, triggered mode.
    pub async fn connect_and_reset(&mut self, address: &str, channel: u32) -> AwgResult<()> {
        self.connect(address).await?;

        self.stop_generation().await?;
        self.reset().await?;
        self.set_memory_extended(channel).await?;
        self.clear_waveform_memory(channel).await?;
        self.set_output(channel, true).await?;
        self.set_internal_trigger().await?;
        self.set_triggered_mode().await?;

        info!(address, channel, "AWG connected and reset");
        Ok(())
    }

    /// Define `segment` on `channel` and transfer `waveform` into it.
    pub async fn add_waveform_to_segment(
        &self,
        waveform: &QuantizedWaveform,
        channel: u32,
        segment: u32,
    ) -> Result<(), DispatchError> {
        let session = self.session()?;
        session
            .dispatch(scpi::define_segment(channel, segment, waveform.len()))
            .await?;
        session
            .dispatch_binary(scpi::segment_data_header(channel, segment), waveform.as_bytes())
            .await?;
        debug!(channel, segment, samples = waveform.len(), "Waveform transferred");
        Ok(())
    }

    /// Validate and quantize raw data, clear the channel memory, and load the
    /// waveform into `segment`.
    ///
    /// Validation happens before any device traffic.
    pub async fn load_waveform(
        &self,
        times: &[f64],
        voltages: &[f64],
        channel: u32,
        segment: u32,
    ) -> AwgResult<()> {
        let quantized = waveform::encode(times, voltages)?;

        self.clear_waveform_memory(channel).await?;
        self.add_waveform_to_segment(&quantized, channel, segment).await?;

        info!(channel, segment, samples = quantized.len(), "Waveform loaded");
        Ok(())
    }

    /// Select `segment`, check the error queue, and start generation only if
    /// the queue was empty.
    ///
    /// # Errors
    /// `InstrumentErrors` with the drained entries if the instrument reported
    /// any; generation is not started in that case.
    pub async fn start_signal_generation(&self, channel: u32, segment: u32) -> AwgResult<()> {
        self.select_segment(channel, segment).await?;

        let errors = self.drain_errors().await?;
        if !errors.is_empty() {
            return Err(AwgError::InstrumentErrors(errors));
        }

        self.start_generation().await?;
        info!(channel, segment, "Signal generation started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amplitude_in_range_is_kept() {
        let setting = AmplitudeSetting::coerce(0.5);
        assert_eq!(setting.applied, 0.5);
        assert!(!setting.coerced);

        assert!(!AmplitudeSetting::coerce(MIN_AMPLITUDE).coerced);
        assert!(!AmplitudeSetting::coerce(MAX_AMPLITUDE).coerced);
    }

    #[test]
    fn test_amplitude_out_of_range_uses_lower_bound() {
        for requested in [2.0, 0.0, -0.5, 0.074, 1.0001, f64::NAN] {
            let setting = AmplitudeSetting::coerce(requested);
            assert_eq!(setting.applied, MIN_AMPLITUDE);
            assert!(setting.coerced);
        }
    }
}
