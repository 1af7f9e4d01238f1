//! Sequence-table entry encoding.
//!
//! The M8195A sequence table is written one row at a time with
//! `:SOURce:STABle:DATA`. A row either plays a segment (data entry) or holds
//! a constant DAC value for a number of samples (idle entry). The core keeps
//! no table state; these functions only produce the argument lists.

use bitflags::bitflags;
use std::fmt;

use crate::error::SequenceError;

/// Minimum idle delay in samples.
pub const MIN_IDLE_DELAY: u32 = 2560;

bitflags! {
    /// Control bits of a sequence-table row.
    ///
    /// Flags combine with `|`; mutually exclusive combinations are not
    /// rejected. `ControlMarker::empty()` is "none".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ControlMarker: u32 {
        /// Row starts a sequence
        const SEQUENCE_INIT = 0x1000_0000;
        /// Row ends a sequence
        const SEQUENCE_END = 0x4000_0000;
        /// Generate a marker pulse for this row
        const MARKER_ENABLE = 0x0100_0000;
        /// Row is a command (idle) entry
        const COMMAND_FLAG = 0x8000_0000;
    }
}

/// Sequence-table row that plays a waveform segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataEntry {
    /// Table row index
    pub slot: u32,
    /// Control bits
    pub markers: ControlMarker,
    /// Repetitions of the whole sequence
    pub sequence_loop_count: u32,
    /// Repetitions of this segment
    pub segment_loop_count: u32,
    /// Segment to play
    pub segment_id: u32,
    /// First sample of the segment to play
    pub start_offset: u32,
    /// Last sample of the segment to play
    pub end_offset: u32,
}

/// Sequence-table row that outputs a constant value for `idle_delay` samples.
///
/// Construct with [`IdleEntry::new`], which enforces [`MIN_IDLE_DELAY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleEntry {
    slot: u32,
    markers: ControlMarker,
    sequence_loop_count: u32,
    idle_sample: i8,
    idle_delay: u32,
}

impl IdleEntry {
    /// Create an idle entry.
    ///
    /// # Errors
    /// `IdleDelayTooShort` if `idle_delay` is below [`MIN_IDLE_DELAY`].
    pub fn new(
        slot: u32,
        markers: ControlMarker,
        sequence_loop_count: u32,
        idle_sample: i8,
        idle_delay: u32,
    ) -> Result<Self, SequenceError> {
        if idle_delay < MIN_IDLE_DELAY {
            return Err(SequenceError::IdleDelayTooShort {
                delay: idle_delay,
                minimum: MIN_IDLE_DELAY,
            });
        }
        Ok(Self {
            slot,
            markers,
            sequence_loop_count,
            idle_sample,
            idle_delay,
        })
    }

    /// Table row index
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Control bits
    pub fn markers(&self) -> ControlMarker {
        self.markers
    }

    /// Repetitions of the whole sequence
    pub fn sequence_loop_count(&self) -> u32 {
        self.sequence_loop_count
    }

    /// DAC value held during the idle time
    pub fn idle_sample(&self) -> i8 {
        self.idle_sample
    }

    /// Idle time in samples
    pub fn idle_delay(&self) -> u32 {
        self.idle_delay
    }
}

/// One row of the sequence table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceTableEntry {
    /// Plays a segment
    Data(DataEntry),
    /// Holds a constant value
    Idle(IdleEntry),
}

impl SequenceTableEntry {
    /// Table slot this entry writes to
    pub fn slot(&self) -> u32 {
        match self {
            Self::Data(entry) => entry.slot,
            Self::Idle(entry) => entry.slot,
        }
    }

    /// Full `:SOURce:STABle:DATA` command for this entry.
    pub fn to_command(&self) -> String {
        let fields = match self {
            Self::Data(entry) => encode_data_entry(entry),
            Self::Idle(entry) => encode_idle_entry(entry),
        };
        format!(":SOURce:STABle:DATA {}", fields)
    }
}

impl From<DataEntry> for SequenceTableEntry {
    fn from(entry: DataEntry) -> Self {
        Self::Data(entry)
    }
}

impl From<IdleEntry> for SequenceTableEntry {
    fn from(entry: IdleEntry) -> Self {
        Self::Idle(entry)
    }
}

impl fmt::Display for SequenceTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_command())
    }
}

/// `<slot>,<markers>,<seqLoop>,<segLoop>,<segID>,<startOff>,<endOff>`
pub fn encode_data_entry(entry: &DataEntry) -> String {
    format!(
        "{},{},{},{},{},{},{}",
        entry.slot,
        entry.markers.bits(),
        entry.sequence_loop_count,
        entry.segment_loop_count,
        entry.segment_id,
        entry.start_offset,
        entry.end_offset
    )
}

/// `<slot>,<markers>,<seqLoop>,0,<idleSample>,<idleDelay>,0`
pub fn encode_idle_entry(entry: &IdleEntry) -> String {
    format!(
        "{},{},{},0,{},{},0",
        entry.slot,
        entry.markers.bits(),
        entry.sequence_loop_count,
        entry.idle_sample,
        entry.idle_delay
    )
}
