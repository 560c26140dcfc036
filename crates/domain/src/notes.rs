use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::RangePolicy;
use crate::events::Pitch;
use crate::DomainError;

pub const A4_HZ: f64 = 440.0;
/// Keyboard position of A4 (A0 = 1).
pub const A4_KEY_NUMBER: i32 = 49;
/// MIDI number of A4.
pub const A4_MIDI_NUMBER: i32 = 69;
/// `midi_number = key_number + KEY_TO_MIDI_OFFSET`
pub const KEY_TO_MIDI_OFFSET: i32 = A4_MIDI_NUMBER - A4_KEY_NUMBER;
pub const MIDI_RANGE: RangeInclusive<i64> = 0..=127;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl PitchClass {
    /// Chromatic order starting at C.
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Chromatic order starting at A, indexed by `(key_number - 1) mod 12`.
    const KEYBOARD: [PitchClass; 12] = [
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
    ];

    pub fn from_semitone(semitone: i32) -> Self {
        Self::ALL[semitone.rem_euclid(12) as usize]
    }

    /// Semitones above C.
    pub fn semitone(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::CSharp => "C#",
            PitchClass::D => "D",
            PitchClass::DSharp => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::FSharp => "F#",
            PitchClass::G => "G",
            PitchClass::GSharp => "G#",
            PitchClass::A => "A",
            PitchClass::ASharp => "A#",
            PitchClass::B => "B",
        }
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NoteName {
    pub class: PitchClass,
    pub octave: i32,
}

impl NoteName {
    pub fn new(class: PitchClass, octave: i32) -> Self {
        Self { class, octave }
    }

    pub fn from_midi(midi_number: i32) -> Self {
        Self {
            class: PitchClass::from_semitone(midi_number),
            octave: midi_number.div_euclid(12) - 1,
        }
    }

    pub fn from_key_number(key_number: i32) -> Self {
        Self {
            class: PitchClass::KEYBOARD[(key_number - 1).rem_euclid(12) as usize],
            octave: (key_number + 8).div_euclid(12),
        }
    }

    pub fn midi_number(&self) -> i32 {
        (self.octave + 1) * 12 + self.class.semitone()
    }
}

impl fmt::Display for NoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.class, self.octave)
    }
}

impl FromStr for NoteName {
    type Err = DomainError;

    /// Accepts sharps and flats (`C#4`, `Db4`, `Cb4`), normalised to sharps.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("invalid note name {:?}", s));
        let mut chars = s.trim().chars().peekable();
        let letter = chars.next().ok_or_else(invalid)?;
        let base = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(invalid()),
        };
        let mut offset = 0;
        while let Some(&c) = chars.peek() {
            match c {
                '#' => offset += 1,
                'b' => offset -= 1,
                _ => break,
            }
            chars.next();
        }
        let octave: i32 = chars.collect::<String>().parse().map_err(|_| invalid())?;
        Ok(Self::from_midi((octave + 1) * 12 + base + offset))
    }
}

/// Result of the equal-tempered lookup for one frequency.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum NoteReading {
    Silence,
    Note { name: NoteName, key_number: i32 },
}

impl NoteReading {
    pub fn name(&self) -> Option<NoteName> {
        match self {
            NoteReading::Silence => None,
            NoteReading::Note { name, .. } => Some(*name),
        }
    }

    pub fn midi_number(&self) -> Option<i32> {
        match self {
            NoteReading::Silence => None,
            NoteReading::Note { key_number, .. } => Some(key_number + KEY_TO_MIDI_OFFSET),
        }
    }
}

/// Nearest equal-tempered note for `freq_hz`. Zero, negative and non-finite
/// input reads as silence.
pub fn frequency_to_note(freq_hz: f64) -> NoteReading {
    match Pitch::from_hz(freq_hz) {
        Pitch::Silence => NoteReading::Silence,
        Pitch::Hz(hz) => {
            let key_number = (12.0 * (hz / A4_HZ).log2() + A4_KEY_NUMBER as f64).round() as i32;
            NoteReading::Note {
                name: NoteName::from_key_number(key_number),
                key_number,
            }
        }
    }
}

pub fn frequency_to_midi(freq_hz: f64) -> Option<i32> {
    frequency_to_note(freq_hz).midi_number()
}

/// Equal-tempered frequency of a MIDI note number.
pub fn note_number_to_frequency(midi_number: u8) -> f64 {
    A4_HZ * 2f64.powf((midi_number as f64 - A4_MIDI_NUMBER as f64) / 12.0)
}

/// Interval from `from_hz` to `to_hz` in cents.
pub fn cents_between(from_hz: f64, to_hz: f64) -> f64 {
    1200.0 * (to_hz / from_hz).log2()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NoteLabel {
    pub name: String,
    pub midi_number: u8,
    pub frequency_hz: f64,
}

impl NoteLabel {
    pub fn from_midi(midi_number: u8) -> Self {
        Self {
            name: NoteName::from_midi(midi_number as i32).to_string(),
            midi_number,
            frequency_hz: note_number_to_frequency(midi_number),
        }
    }
}

/// Labels frequencies with MIDI notes, enforcing the MIDI range by policy.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrequencyNoteMapper {
    policy: RangePolicy,
}

impl FrequencyNoteMapper {
    pub fn new(policy: RangePolicy) -> Self {
        Self { policy }
    }

    pub fn midi_number(&self, pitch: impl Into<Pitch>) -> Result<Option<u8>, DomainError> {
        let pitch = pitch.into();
        let Some(hz) = pitch.hz() else {
            return Ok(None);
        };
        let Some(raw) = frequency_to_midi(hz) else {
            return Ok(None);
        };
        let midi = self
            .policy
            .apply(raw as i64, *MIDI_RANGE.start(), *MIDI_RANGE.end())?;
        trace!(hz, midi, "mapped frequency");
        Ok(Some(midi as u8))
    }

    pub fn label(&self, pitch: impl Into<Pitch>) -> Result<Option<NoteLabel>, DomainError> {
        Ok(self.midi_number(pitch)?.map(NoteLabel::from_midi))
    }
}

/// Base frequencies for octave 0, doubled per octave to fill the table.
static OCTAVE_ZERO_HZ: [(PitchClass, f64); 12] = [
    (PitchClass::C, 16.35),
    (PitchClass::CSharp, 17.32),
    (PitchClass::D, 18.35),
    (PitchClass::DSharp, 19.45),
    (PitchClass::E, 20.60),
    (PitchClass::F, 21.83),
    (PitchClass::FSharp, 23.12),
    (PitchClass::G, 24.50),
    (PitchClass::GSharp, 25.96),
    (PitchClass::A, 27.50),
    (PitchClass::ASharp, 29.14),
    (PitchClass::B, 30.87),
];

pub const REFERENCE_OCTAVES: RangeInclusive<i32> = 0..=8;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReferenceNote {
    pub name: NoteName,
    pub frequency_hz: f64,
}

static STANDARD_TABLE: Lazy<ReferenceTable> = Lazy::new(|| {
    let table = ReferenceTable::generate();
    table
        .validate()
        .expect("generated reference table covers every pitch class");
    table
});

/// Fixed note/frequency table used to classify aggregated pitches.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceTable {
    notes: Vec<ReferenceNote>,
}

impl ReferenceTable {
    pub fn standard() -> &'static ReferenceTable {
        &STANDARD_TABLE
    }

    fn generate() -> Self {
        let notes = REFERENCE_OCTAVES
            .flat_map(|octave| {
                OCTAVE_ZERO_HZ.iter().map(move |&(class, base)| ReferenceNote {
                    name: NoteName::new(class, octave),
                    frequency_hz: base * 2f64.powi(octave),
                })
            })
            .collect();
        Self { notes }
    }

    /// Every pitch class once per octave, frequencies strictly increasing.
    pub fn validate(&self) -> Result<(), DomainError> {
        let octaves = REFERENCE_OCTAVES.count();
        if self.notes.len() != octaves * PitchClass::ALL.len() {
            return Err(DomainError::validation(format!(
                "reference table has {} entries, expected {}",
                self.notes.len(),
                octaves * PitchClass::ALL.len()
            )));
        }
        for (octave, row) in REFERENCE_OCTAVES.zip(self.notes.chunks(PitchClass::ALL.len())) {
            for (class, note) in PitchClass::ALL.iter().zip(row) {
                if note.name != NoteName::new(*class, octave) {
                    return Err(DomainError::validation(format!(
                        "reference table expected {}{} but found {}",
                        class, octave, note.name
                    )));
                }
            }
        }
        if let Some(pair) = self
            .notes
            .windows(2)
            .find(|pair| pair[0].frequency_hz >= pair[1].frequency_hz)
        {
            return Err(DomainError::validation(format!(
                "reference frequencies not increasing at {}",
                pair[1].name
            )));
        }
        Ok(())
    }

    pub fn notes(&self) -> &[ReferenceNote] {
        &self.notes
    }

    /// Entry with the smallest absolute frequency distance; ties go to the lower note.
    pub fn nearest(&self, pitch: impl Into<Pitch>) -> Option<&ReferenceNote> {
        let hz = pitch.into().hz()?;
        let upper = self.notes.partition_point(|note| note.frequency_hz < hz);
        let below = upper.checked_sub(1).and_then(|index| self.notes.get(index));
        let above = self.notes.get(upper);
        match (below, above) {
            (Some(low), Some(high)) => {
                if hz - low.frequency_hz <= high.frequency_hz - hz {
                    Some(low)
                } else {
                    Some(high)
                }
            }
            (low, high) => low.or(high),
        }
    }
}
