//! Waveform validation and quantization for the M8195A.
//!
//! The instrument plays 8-bit samples at a fixed 64 GSa/s. Raw data arrives as
//! an equidistant time array and a matching voltage array; before any byte is
//! sent it must satisfy three constraints, checked in this order:
//!
//! 1. sample spacing equals [`SAMPLE_PERIOD`] within [`SAMPLE_PERIOD_TOLERANCE`]
//! 2. sample count is a multiple of [`GRANULARITY`]
//! 3. sample count is at least [`MIN_SAMPLES`]
//!
//! Quantization scales each voltage by [`QUANTIZATION_FACTOR`], rounds, and
//! truncates to `i8`. Voltages outside roughly ±1 V are NOT clamped: the
//! scaled value wraps around the signed-byte range.

use bytes::Bytes;

use crate::error::ValidationError;

/// Sample period of the AWG in seconds (64 GSa/s).
pub const SAMPLE_PERIOD: f64 = 1.0 / 64e9;

/// Allowed relative deviation of the measured sample spacing (1%).
pub const SAMPLE_PERIOD_TOLERANCE: f64 = 0.01;

/// Minimum number of samples in a segment.
pub const MIN_SAMPLES: usize = 1280;

/// Sample count must be a multiple of this value.
pub const GRANULARITY: usize = 256;

/// Volts-to-DAC-code scale factor.
pub const QUANTIZATION_FACTOR: f64 = 127.0;

/// A candidate waveform: equidistant times (s) and voltages (V) of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformBuffer {
    times: Vec<f64>,
    voltages: Vec<f64>,
}

impl WaveformBuffer {
    /// Wrap externally parsed data.
    ///
    /// # Errors
    /// `LengthMismatch` if the arrays differ in length. The instrument
    /// constraints are checked later by [`validate`](Self::validate).
    pub fn new(times: Vec<f64>, voltages: Vec<f64>) -> Result<Self, ValidationError> {
        if times.len() != voltages.len() {
            return Err(ValidationError::LengthMismatch {
                times: times.len(),
                voltages: voltages.len(),
            });
        }
        Ok(Self { times, voltages })
    }

    /// Time samples in seconds
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Voltage samples in volts
    pub fn voltages(&self) -> &[f64] {
        &self.voltages
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.voltages.len()
    }

    /// True if the buffer holds no samples
    pub fn is_empty(&self) -> bool {
        self.voltages.is_empty()
    }

    /// Check the buffer against the instrument constraints.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate(&self.times, &self.voltages)
    }

    /// Validate and quantize the buffer.
    pub fn encode(&self) -> Result<QuantizedWaveform, ValidationError> {
        encode(&self.times, &self.voltages)
    }
}

/// Signed 8-bit DAC codes ready for a binary block transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizedWaveform {
    samples: Vec<i8>,
}

impl QuantizedWaveform {
    /// Wrap already-quantized samples.
    pub fn from_samples(samples: Vec<i8>) -> Self {
        Self { samples }
    }

    /// DAC codes, one per input voltage sample
    pub fn samples(&self) -> &[i8] {
        &self.samples
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if there are no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Two's-complement byte payload for the binary block.
    pub fn as_bytes(&self) -> Bytes {
        self.samples.iter().map(|&s| s as u8).collect::<Vec<u8>>().into()
    }
}

/// Check `(times, voltages)` against the instrument constraints.
///
/// Fails fast on the first violated constraint, in the order sample rate,
/// granularity, minimum length. The spacing is measured from the first two
/// time samples; with fewer than two samples the rate check is skipped.
///
/// # Errors
/// - `LengthMismatch` if the arrays differ in length
/// - `SampleRateMismatch` if the spacing is off by more than 1%
/// - `GranularityViolation` if the length is not a multiple of 256
/// - `TooFewSamples` if the length is below 1280
pub fn validate(times: &[f64], voltages: &[f64]) -> Result<(), ValidationError> {
    if times.len() != voltages.len() {
        return Err(ValidationError::LengthMismatch {
            times: times.len(),
            voltages: voltages.len(),
        });
    }

    if let [t0, t1, ..] = times {
        let measured = t1 - t0;
        // Written as a negated <= so that NaN spacing is rejected.
        if !((SAMPLE_PERIOD - measured).abs() <= SAMPLE_PERIOD * SAMPLE_PERIOD_TOLERANCE) {
            return Err(ValidationError::SampleRateMismatch {
                measured,
                expected: SAMPLE_PERIOD,
            });
        }
    }

    let len = voltages.len();
    if len % GRANULARITY != 0 {
        return Err(ValidationError::GranularityViolation {
            len,
            granularity: GRANULARITY,
        });
    }

    if len < MIN_SAMPLES {
        return Err(ValidationError::TooFewSamples {
            len,
            minimum: MIN_SAMPLES,
        });
    }

    Ok(())
}

/// Validate and quantize a waveform.
///
/// Sample `i` of the result is `round(127 * voltages[i])` truncated to `i8`.
/// Out-of-range values wrap rather than saturate (e.g. 1.5 V gives 191,
/// which wraps to -65). Pure function: no I/O, no device access.
pub fn encode(times: &[f64], voltages: &[f64]) -> Result<QuantizedWaveform, ValidationError> {
    validate(times, voltages)?;
    Ok(QuantizedWaveform {
        samples: voltages.iter().map(|&v| quantize(v)).collect(),
    })
}

/// Convert one voltage to a DAC code.
///
/// `f64 as i64` saturates (NaN maps to 0); `i64 as i8` keeps the low byte.
pub fn quantize(voltage: f64) -> i8 {
    (QUANTIZATION_FACTOR * voltage).round() as i64 as i8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn times(n: usize, dt: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * dt).collect()
    }

    #[test]
    fn test_valid_waveform_passes() {
        let t = times(MIN_SAMPLES, SAMPLE_PERIOD);
        let v = vec![0.0; MIN_SAMPLES];
        assert!(validate(&t, &v).is_ok());
    }

    #[test]
    fn test_spacing_within_tolerance_passes() {
        let t = times(MIN_SAMPLES, SAMPLE_PERIOD * 1.009);
        let v = vec![0.0; MIN_SAMPLES];
        assert!(validate(&t, &v).is_ok());
    }

    #[test]
    fn test_sample_rate_mismatch() {
        let t = times(MIN_SAMPLES, SAMPLE_PERIOD * 2.0);
        let v = vec![0.0; MIN_SAMPLES];
        match validate(&t, &v) {
            Err(ValidationError::SampleRateMismatch { measured, expected }) => {
                assert!((measured - 2.0 * SAMPLE_PERIOD).abs() < 1e-20);
                assert_eq!(expected, SAMPLE_PERIOD);
            }
            other => panic!("expected SampleRateMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_nan_spacing_rejected() {
        let mut t = times(MIN_SAMPLES, SAMPLE_PERIOD);
        t[1] = f64::NAN;
        let v = vec![0.0; MIN_SAMPLES];
        assert!(matches!(
            validate(&t, &v),
            Err(ValidationError::SampleRateMismatch { .. })
        ));
    }

    #[test]
    fn test_rate_checked_before_granularity() {
        // Both wrong: rate must win.
        let t = times(1000, SAMPLE_PERIOD * 3.0);
        let v = vec![0.0; 1000];
        assert!(matches!(
            validate(&t, &v),
            Err(ValidationError::SampleRateMismatch { .. })
        ));
    }

    #[test]
    fn test_granularity_violation() {
        let n = MIN_SAMPLES + 1;
        let err = validate(&times(n, SAMPLE_PERIOD), &vec![0.0; n]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::GranularityViolation {
                len: n,
                granularity: GRANULARITY
            }
        );
    }

    #[test]
    fn test_too_few_samples() {
        let n = 4 * GRANULARITY;
        let err = validate(&times(n, SAMPLE_PERIOD), &vec![0.0; n]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::TooFewSamples {
                len: n,
                minimum: MIN_SAMPLES
            }
        );
    }

    #[test]
    fn test_empty_and_single_sample() {
        assert!(matches!(
            validate(&[], &[]),
            Err(ValidationError::TooFewSamples { len: 0, .. })
        ));
        assert!(matches!(
            validate(&[0.0], &[0.0]),
            Err(ValidationError::GranularityViolation { len: 1, .. })
        ));
    }

    #[test]
    fn test_length_mismatch() {
        let err = WaveformBuffer::new(vec![0.0; 3], vec![0.0; 2]).unwrap_err();
        assert_eq!(err, ValidationError::LengthMismatch { times: 3, voltages: 2 });
        assert!(matches!(
            validate(&[0.0, SAMPLE_PERIOD], &[0.0]),
            Err(ValidationError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_quantize_in_range() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(1.0), 127);
        assert_eq!(quantize(-1.0), -127);
        assert_eq!(quantize(0.5), 64); // 63.5 rounds away from zero
        assert_eq!(quantize(-0.25), -32); // -31.75
    }

    #[test]
    fn test_quantize_wraps_out_of_range() {
        assert_eq!(quantize(1.5), -65); // 190.5 -> 191 -> 0xBF
        assert_eq!(quantize(-1.5), 65);
        assert_eq!(quantize(f64::NAN), 0);
    }

    #[test]
    fn test_encode_produces_one_byte_per_sample() {
        let buffer = WaveformBuffer::new(
            times(MIN_SAMPLES, SAMPLE_PERIOD),
            (0..MIN_SAMPLES).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect(),
        )
        .unwrap();
        let encoded = buffer.encode().unwrap();
        assert_eq!(encoded.len(), MIN_SAMPLES);
        assert_eq!(&encoded.samples()[..2], &[127, -127]);
        assert_eq!(&encoded.as_bytes()[..2], &[0x7F, 0x81]);
    }

    #[test]
    fn test_encode_rejects_invalid_data() {
        let buffer = WaveformBuffer::new(times(256, SAMPLE_PERIOD), vec![0.1; 256]).unwrap();
        assert!(buffer.encode().is_err());
    }
}
