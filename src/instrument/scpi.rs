//! M8195A SCPI command strings.
//!
//! Numbers are formatted with Rust's locale-independent formatting, so the
//! decimal separator is always `.`.

/// Identity query
pub const IDENTITY: &str = "*idn?";
/// Reset to factory defaults
pub const RESET: &str = "*RST";
/// Start signal generation
pub const START: &str = ":INIT:IMM";
/// Stop signal generation
pub const STOP: &str = ":ABOR";
/// DAC mode with marker outputs
pub const MARKER_MODE: &str = ":INST:DACM MARK";
/// Sequence-table playback
pub const SEQUENCE_MODE: &str = ":FUNC:MODE STSequence";
/// Advance through the sequence automatically
pub const ADVANCE_AUTO: &str = ":TRAC:ADV AUTO";
/// Triggered (non-continuous) run mode
pub const TRIGGERED_MODE: &str = ":INIT:CONT OFF";
/// Internal trigger source
pub const INTERNAL_TRIGGER: &str = ":ARM:TRIG:SOUR INT";
/// Pop one entry from the error queue
pub const ERROR_QUERY: &str = "SYSTem:ERRor?";

/// Delete all segments of `channel`
pub fn clear_memory(channel: u32) -> String {
    format!(":TRAC{}:DEL:ALL", channel)
}

/// Extended waveform memory for `channel`
pub fn extended_memory(channel: u32) -> String {
    format!(":TRAC{}:MMOD EXT", channel)
}

/// Output amplifier on/off
pub fn output(channel: u32, on: bool) -> String {
    format!(":OUTP{} {}", channel, if on { "ON" } else { "OFF" })
}

/// Segment played after start
pub fn select_segment(channel: u32, segment: u32) -> String {
    format!(":TRAC{}:SEL {}", channel, segment)
}

/// Internal trigger frequency in Hz
pub fn trigger_frequency(hz: f64) -> String {
    format!(":ARM:TRIGger:FREQuency {}", hz)
}

/// Amplitude with exactly three decimals.
pub fn amplitude(volts: f64) -> String {
    format!(":VOLT {:.3}", volts)
}

/// Allocate `segment` with `len` samples
pub fn define_segment(channel: u32, segment: u32, len: usize) -> String {
    format!(":TRAC{}:DEF {},{}", channel, segment, len)
}

/// Header preceding the binary block of segment data.
pub fn segment_data_header(channel: u32, segment: u32) -> String {
    format!(":TRAC{}:data {},0,", channel, segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameterized_commands() {
        assert_eq!(clear_memory(1), ":TRAC1:DEL:ALL");
        assert_eq!(extended_memory(2), ":TRAC2:MMOD EXT");
        assert_eq!(output(1, true), ":OUTP1 ON");
        assert_eq!(output(4, false), ":OUTP4 OFF");
        assert_eq!(select_segment(1, 3), ":TRAC1:SEL 3");
        assert_eq!(define_segment(1, 2, 1280), ":TRAC1:DEF 2,1280");
        assert_eq!(segment_data_header(1, 2), ":TRAC1:data 2,0,");
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(amplitude(0.5), ":VOLT 0.500");
        assert_eq!(amplitude(0.075), ":VOLT 0.075");
        assert_eq!(amplitude(1.0), ":VOLT 1.000");
        assert_eq!(trigger_frequency(1000.0), ":ARM:TRIGger:FREQuency 1000");
        assert_eq!(trigger_frequency(2.5e6), ":ARM:TRIGger:FREQuency 2500000");
        assert_eq!(trigger_frequency(0.25), ":ARM:TRIGger:FREQuency 0.25");
    }
}
