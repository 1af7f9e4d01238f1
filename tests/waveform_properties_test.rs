//! Property tests for waveform validation and quantization

use awg_supervision::error::ValidationError;
use awg_supervision::waveform::{
    encode, quantize, validate, GRANULARITY, MIN_SAMPLES, SAMPLE_PERIOD,
};
use proptest::prelude::*;

fn uniform_times(len: usize, dt: f64) -> Vec<f64> {
    (0..len).map(|i| i as f64 * dt).collect()
}

proptest! {
    #[test]
    fn prop_non_multiple_length_is_granularity_violation(len in 1usize..4096) {
        prop_assume!(len % GRANULARITY != 0);
        let times = uniform_times(len, SAMPLE_PERIOD);
        let voltages = vec![0.0; len];

        let is_granularity_violation = matches!(
            validate(&times, &voltages),
            Err(ValidationError::GranularityViolation { .. })
        );
        prop_assert!(is_granularity_violation);
    }

    #[test]
    fn prop_wrong_spacing_is_rate_mismatch(
        blocks in 1usize..16,
        factor in prop_oneof![0.5f64..0.985, 1.015f64..2.0],
    ) {
        let len = blocks * GRANULARITY;
        let times = uniform_times(len, SAMPLE_PERIOD * factor);
        let voltages = vec![0.0; len];

        let is_rate_mismatch = matches!(
            validate(&times, &voltages),
            Err(ValidationError::SampleRateMismatch { .. })
        );
        prop_assert!(is_rate_mismatch);
    }

    #[test]
    fn prop_short_aligned_waveform_is_too_few_samples(blocks in 1usize..5) {
        let len = blocks * GRANULARITY;
        let times = uniform_times(len, SAMPLE_PERIOD);
        let voltages = vec![0.0; len];

        prop_assert_eq!(
            validate(&times, &voltages),
            Err(ValidationError::TooFewSamples { len, minimum: MIN_SAMPLES })
        );
    }

    #[test]
    fn prop_valid_waveform_encodes_each_sample(
        blocks in 5usize..12,
        jitter in 0.995f64..1.005,
        seed in prop::collection::vec(-1.0f64..1.0, GRANULARITY),
    ) {
        let len = blocks * GRANULARITY;
        let times = uniform_times(len, SAMPLE_PERIOD * jitter);
        let voltages: Vec<f64> = (0..len).map(|i| seed[i % seed.len()]).collect();

        let first = encode(&times, &voltages).unwrap();
        let second = encode(&times, &voltages).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.len(), len);

        let bytes = first.as_bytes();
        for (byte, voltage) in bytes.iter().zip(&voltages) {
            let expected = (127.0 * voltage).round() as i8;
            prop_assert_eq!(*byte as i8, expected);
        }
    }

    #[test]
    fn prop_quantize_stays_in_range_for_unit_voltages(voltage in -1.0f64..=1.0) {
        let code = quantize(voltage);
        prop_assert!((-127..=127).contains(&code));
    }
}

#[test]
fn test_out_of_range_voltages_wrap() {
    assert_eq!(quantize(1.0), 127);
    assert_eq!(quantize(-1.0), -127);
    assert_eq!(quantize(1.5), -65);
    assert_eq!(quantize(f64::NAN), 0);
}
