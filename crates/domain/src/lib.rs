pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod io;
pub mod notes;

pub use crate::clock::{ClockState, StreamHeader, TickClock};
pub use crate::config::{RangePolicy, TranscriptionConfig};
pub use crate::error::DomainError;
pub use crate::events::{
    EncodedTrack, Frame, NoteDetection, NoteEvent, NoteEventKind, NoteOnset, Onset, Pitch,
    RawNoteDetection, Segment, SegmentNote,
};
pub use crate::io::{DetectorCapture, ExportFormat, ReportExporter, TranscriptionReport};
pub use crate::notes::{
    frequency_to_note, note_number_to_frequency, FrequencyNoteMapper, NoteLabel, NoteName,
    NoteReading, PitchClass, ReferenceNote, ReferenceTable,
};
