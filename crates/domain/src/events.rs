use serde::{Deserialize, Serialize};
use time::Duration;

use crate::clock::StreamHeader;
use crate::config::RangePolicy;
use crate::notes::{NoteLabel, ReferenceNote, MIDI_RANGE};
use crate::DomainError;

/// A pitch measurement, with "no pitch" as an explicit variant.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub enum Pitch {
    Silence,
    Hz(f64),
}

impl Pitch {
    /// Zero, negative and non-finite frequencies are silence.
    pub fn from_hz(hz: f64) -> Self {
        if hz.is_finite() && hz > 0.0 {
            Pitch::Hz(hz)
        } else {
            Pitch::Silence
        }
    }

    pub fn hz(&self) -> Option<f64> {
        match self {
            Pitch::Silence => None,
            Pitch::Hz(hz) => Some(*hz),
        }
    }

    pub fn is_silence(&self) -> bool {
        matches!(self, Pitch::Silence)
    }
}

impl From<f64> for Pitch {
    fn from(hz: f64) -> Self {
        Pitch::from_hz(hz)
    }
}

fn full_confidence() -> f32 {
    1.0
}

/// One analysis window's worth of detector output.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub index: u64,
    /// Seconds from the start of the stream.
    pub time: f64,
    pub pitch_hz: f64,
    /// Detector confidence in [0, 1]; missing channels read as fully confident.
    #[serde(default = "full_confidence")]
    pub confidence: f32,
}

impl Frame {
    pub fn new(index: u64, time: f64, pitch_hz: f64, confidence: f32) -> Self {
        Self {
            index,
            time,
            pitch_hz,
            confidence,
        }
    }

    /// Frame whose time follows from its index and the hop size.
    pub fn at_hop(index: u64, hop_size: u32, sample_rate: u32, pitch_hz: f64) -> Self {
        Self::new(
            index,
            index as f64 * hop_size as f64 / sample_rate as f64,
            pitch_hz,
            full_confidence(),
        )
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn pitch(&self) -> Pitch {
        Pitch::from_hz(self.pitch_hz)
    }

    /// Position of the frame's first sample.
    pub fn sample_position(&self, hop_size: u32) -> Result<u64, DomainError> {
        hop_position(self.index, hop_size)
    }

    /// Position of the first sample after this frame's hop.
    pub fn end_position(&self, hop_size: u32) -> Result<u64, DomainError> {
        let next = self.index.checked_add(1).ok_or_else(|| {
            DomainError::validation(format!("frame index {} has no successor", self.index))
        })?;
        hop_position(next, hop_size)
    }
}

fn hop_position(index: u64, hop_size: u32) -> Result<u64, DomainError> {
    index.checked_mul(hop_size as u64).ok_or_else(|| {
        DomainError::validation(format!(
            "frame index {} times hop size {} overflows the sample position",
            index, hop_size
        ))
    })
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, PartialOrd)]
#[serde(transparent)]
pub struct Onset {
    /// Seconds from the start of the stream.
    pub time: f64,
}

impl Onset {
    pub fn new(time: f64) -> Self {
        Self { time }
    }
}

/// Frames between two consecutive onsets.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment<'a> {
    pub start_time: f64,
    pub end_time: f64,
    pub frames: &'a [Frame],
}

impl<'a> Segment<'a> {
    pub fn new(start_time: f64, end_time: f64, frames: &'a [Frame]) -> Self {
        Self {
            start_time,
            end_time,
            frames,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds_f64(self.end_time - self.start_time)
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }
}

/// One segment reduced to a single pitch and its labels.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SegmentNote {
    pub start_time: f64,
    pub end_time: f64,
    pub frame_count: usize,
    /// `None` when the segment held no usable measurement.
    pub mean_hz: Option<f64>,
    pub label: Option<NoteLabel>,
    pub reference: Option<ReferenceNote>,
}

impl SegmentNote {
    pub fn is_silent(&self) -> bool {
        self.label.is_none()
    }
}

/// Detector note-channel output as reported, with `0` meaning "nothing".
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawNoteDetection {
    pub frame: u64,
    pub note_on: i32,
    pub velocity: i32,
    pub note_off: i32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteOnset {
    pub midi: u8,
    pub velocity: u8,
}

/// Validated detector output for one sample-frame position.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteDetection {
    pub frame: u64,
    pub note_on: Option<NoteOnset>,
    pub note_off: Option<u8>,
}

impl NoteDetection {
    pub fn on(frame: u64, midi: u8, velocity: u8) -> Self {
        Self {
            frame,
            note_on: Some(NoteOnset { midi, velocity }),
            note_off: None,
        }
    }

    pub fn off(frame: u64, midi: u8) -> Self {
        Self {
            frame,
            note_on: None,
            note_off: Some(midi),
        }
    }

    pub fn closing(mut self, midi: u8) -> Self {
        self.note_off = Some(midi);
        self
    }

    pub fn from_raw(raw: RawNoteDetection, policy: RangePolicy) -> Result<Self, DomainError> {
        let (min, max) = (*MIDI_RANGE.start(), *MIDI_RANGE.end());
        let note_on = policy.apply(raw.note_on as i64, min, max)? as u8;
        let note_off = policy.apply(raw.note_off as i64, min, max)? as u8;
        let velocity = if note_on > 0 {
            policy.apply(raw.velocity as i64, min, max)? as u8
        } else {
            0
        };
        let detection = Self {
            frame: raw.frame,
            note_on: (note_on > 0).then_some(NoteOnset {
                midi: note_on,
                velocity,
            }),
            note_off: (note_off > 0).then_some(note_off),
        };
        Ok(detection.normalized())
    }

    /// A note-on with velocity 0 is a release of that note, as sinks read it.
    /// Any separately reported release is dropped in that case.
    pub fn normalized(self) -> Self {
        match self.note_on {
            Some(onset) if onset.velocity == 0 => Self::off(self.frame, onset.midi),
            _ => self,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.note_on.is_none() && self.note_off.is_none()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NoteEventKind {
    NoteOn,
    NoteOff,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteEvent {
    pub kind: NoteEventKind,
    pub midi_number: u8,
    pub velocity: u8,
    /// Ticks since the previous event in the track.
    pub delta_ticks: u64,
}

impl NoteEvent {
    pub const RELEASE_VELOCITY: u8 = 127;

    pub fn note_on(midi_number: u8, velocity: u8, delta_ticks: u64) -> Self {
        Self {
            kind: NoteEventKind::NoteOn,
            midi_number,
            velocity,
            delta_ticks,
        }
    }

    pub fn note_off(midi_number: u8, delta_ticks: u64) -> Self {
        Self {
            kind: NoteEventKind::NoteOff,
            midi_number,
            velocity: Self::RELEASE_VELOCITY,
            delta_ticks,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EncodedTrack {
    pub header: StreamHeader,
    pub events: Vec<NoteEvent>,
}

impl EncodedTrack {
    pub fn new(header: StreamHeader) -> Self {
        Self {
            header,
            events: Vec::new(),
        }
    }

    /// Running sum of `delta_ticks`, one entry per event.
    pub fn absolute_ticks(&self) -> Vec<u64> {
        self.events
            .iter()
            .scan(0u64, |tick, event| {
                *tick += event.delta_ticks;
                Some(*tick)
            })
            .collect()
    }

    pub fn note_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| event.kind == NoteEventKind::NoteOn)
            .count()
    }

    /// Note left sounding at the end of the track, if any.
    pub fn pending_note(&self) -> Option<u8> {
        let mut sounding = None;
        for event in &self.events {
            match event.kind {
                NoteEventKind::NoteOn => sounding = Some(event.midi_number),
                NoteEventKind::NoteOff => {
                    if sounding == Some(event.midi_number) {
                        sounding = None;
                    }
                }
            }
        }
        sounding
    }
}
