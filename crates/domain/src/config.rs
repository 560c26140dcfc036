use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::{bpm_to_tempo, StreamHeader, TickClock, MAX_TEMPO_MICROS, MAX_TICKS_PER_BEAT};
use crate::DomainError;

/// What to do with a note number that falls outside the MIDI range.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RangePolicy {
    /// Clamp into range and log a warning.
    #[default]
    Clamp,
    /// Fail with [`DomainError::OutOfRangeNote`].
    Reject,
}

impl RangePolicy {
    pub fn apply(self, value: i64, min: i64, max: i64) -> Result<i64, DomainError> {
        if (min..=max).contains(&value) {
            return Ok(value);
        }
        match self {
            RangePolicy::Clamp => {
                let clamped = value.clamp(min, max);
                warn!(value, clamped, "note value out of range, clamping");
                Ok(clamped)
            }
            RangePolicy::Reject => Err(DomainError::OutOfRangeNote { value, min, max }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TranscriptionConfig {
    pub sample_rate: u32,
    pub hop_size: u32,
    pub window_size: u32,
    pub bpm: f64,
    pub ticks_per_beat: u16,
    /// Time signature represented as (numerator, denominator).
    pub time_signature: (u8, u8),
    /// Frames below this confidence are ignored. `None` accepts every frame.
    pub min_confidence: Option<f32>,
    pub force_final_note_off: bool,
    pub range_policy: RangePolicy,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            hop_size: 256,
            window_size: 512,
            bpm: 120.0,
            ticks_per_beat: 480,
            time_signature: (4, 4),
            min_confidence: None,
            force_final_note_off: false,
            range_policy: RangePolicy::Clamp,
        }
    }
}

impl TranscriptionConfig {
    /// Reads a config file, choosing YAML or JSON by extension.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DomainError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| DomainError::Io(format!("read config {:?}: {}", path, err)))?;
        let config: Self = if is_yaml(path) {
            serde_yaml::from_str(&text)
                .map_err(|err| DomainError::Serialization(err.to_string()))?
        } else {
            serde_json::from_str(&text)
                .map_err(|err| DomainError::Serialization(err.to_string()))?
        };
        config.validate()?;
        debug!(?config, "loaded transcription config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.sample_rate == 0 {
            return Err(DomainError::configuration("sample_rate", "must be > 0"));
        }
        if self.hop_size == 0 {
            return Err(DomainError::configuration("hop_size", "must be > 0"));
        }
        if self.window_size < self.hop_size {
            return Err(DomainError::configuration(
                "window_size",
                "must be >= hop_size",
            ));
        }
        if !self.bpm.is_finite() || self.bpm <= 0.0 {
            return Err(DomainError::configuration("bpm", "must be > 0"));
        }
        let tempo = bpm_to_tempo(self.bpm);
        if tempo == 0 || tempo > MAX_TEMPO_MICROS {
            return Err(DomainError::configuration(
                "bpm",
                format!("tempo of {} us per beat is not encodable", tempo),
            ));
        }
        if self.ticks_per_beat == 0 || self.ticks_per_beat > MAX_TICKS_PER_BEAT {
            return Err(DomainError::configuration(
                "ticks_per_beat",
                format!("must be in 1..={}", MAX_TICKS_PER_BEAT),
            ));
        }
        if self.time_signature.0 == 0 || !self.time_signature.1.is_power_of_two() {
            return Err(DomainError::configuration(
                "time_signature",
                "numerator must be > 0 and denominator a power of two",
            ));
        }
        if let Some(min) = self.min_confidence {
            if !min.is_finite() || !(0.0..=1.0).contains(&min) {
                return Err(DomainError::configuration(
                    "min_confidence",
                    "must be in [0, 1]",
                ));
            }
        }
        Ok(())
    }

    /// Run parameters carried by a capture take precedence over the file config.
    pub fn with_overrides(mut self, sample_rate: Option<u32>, hop_size: Option<u32>) -> Self {
        if let Some(rate) = sample_rate {
            self.sample_rate = rate;
        }
        if let Some(hop) = hop_size {
            self.hop_size = hop;
            self.window_size = self.window_size.max(hop);
        }
        self
    }

    pub fn tempo_micros_per_beat(&self) -> u32 {
        bpm_to_tempo(self.bpm)
    }

    pub fn clock(&self) -> Result<TickClock, DomainError> {
        self.validate()?;
        TickClock::new(
            self.sample_rate,
            self.ticks_per_beat,
            self.tempo_micros_per_beat(),
        )
    }

    pub fn header(&self) -> StreamHeader {
        StreamHeader {
            ticks_per_beat: self.ticks_per_beat,
            tempo_micros_per_beat: self.tempo_micros_per_beat(),
            time_signature_numerator: self.time_signature.0,
            time_signature_denominator: self.time_signature.1,
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}
