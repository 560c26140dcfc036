use tracing::{debug, instrument};

use pitchscribe_domain::{
    DomainError, Frame, FrequencyNoteMapper, NoteDetection, NoteOnset, RangePolicy,
    TranscriptionConfig,
};

use crate::aggregate::is_usable;

/// Follows the pitch channel frame by frame and reports a detection
/// whenever the quantized note changes.
#[derive(Clone, Copy, Debug)]
pub struct FrameNoteTracker {
    hop_size: u32,
    min_confidence: Option<f32>,
    mapper: FrequencyNoteMapper,
}

impl FrameNoteTracker {
    pub fn new(hop_size: u32, min_confidence: Option<f32>, policy: RangePolicy) -> Self {
        Self {
            hop_size,
            min_confidence,
            mapper: FrequencyNoteMapper::new(policy),
        }
    }

    pub fn from_config(config: &TranscriptionConfig) -> Self {
        Self::new(config.hop_size, config.min_confidence, config.range_policy)
    }

    #[instrument(skip_all, fields(frames = frames.len()))]
    pub fn track(&self, frames: &[Frame]) -> Result<Vec<NoteDetection>, DomainError> {
        let mut detections = Vec::new();
        let mut current: Option<u8> = None;
        let mut last_index: Option<u64> = None;

        for frame in frames {
            if let Some(previous) = last_index {
                if frame.index <= previous {
                    return Err(DomainError::non_monotonic(
                        "frame indices",
                        previous as f64,
                        frame.index as f64,
                    ));
                }
            }
            last_index = Some(frame.index);

            let reading = if is_usable(frame, self.min_confidence) {
                self.mapper.midi_number(frame.pitch())?
            } else {
                None
            };
            if reading == current {
                continue;
            }

            let position = frame.sample_position(self.hop_size)?;
            match (reading, current) {
                (Some(midi), previous) => detections.push(NoteDetection {
                    frame: position,
                    note_on: Some(NoteOnset {
                        midi,
                        velocity: velocity_from_confidence(frame.confidence),
                    }),
                    note_off: previous,
                }),
                (None, Some(previous)) => detections.push(NoteDetection::off(position, previous)),
                (None, None) => {}
            }
            current = reading;
        }

        debug!(detections = detections.len(), "tracked note changes");
        Ok(detections)
    }
}

/// Detector confidence scaled onto 1..=127.
pub fn velocity_from_confidence(confidence: f32) -> u8 {
    (confidence.clamp(0.0, 1.0) * 127.0).round().max(1.0) as u8
}
