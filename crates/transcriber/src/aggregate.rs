use tracing::{debug, trace};

use pitchscribe_domain::{
    DomainError, Frame, FrequencyNoteMapper, Pitch, RangePolicy, ReferenceTable, Segment,
    SegmentNote, TranscriptionConfig,
};

/// Reduces a segment to one representative pitch.
#[derive(Clone, Copy, Debug)]
pub struct NoteAggregator {
    min_confidence: Option<f32>,
    mapper: FrequencyNoteMapper,
    table: &'static ReferenceTable,
}

impl NoteAggregator {
    pub fn new(min_confidence: Option<f32>, policy: RangePolicy) -> Self {
        Self {
            min_confidence,
            mapper: FrequencyNoteMapper::new(policy),
            table: ReferenceTable::standard(),
        }
    }

    pub fn from_config(config: &TranscriptionConfig) -> Self {
        Self::new(config.min_confidence, config.range_policy)
    }

    pub fn accepts(&self, frame: &Frame) -> bool {
        is_usable(frame, self.min_confidence)
    }

    /// Mean pitch of the accepted frames, or silence when none are left.
    pub fn aggregate(&self, segment: &Segment<'_>) -> Pitch {
        let (sum, count) = segment
            .frames
            .iter()
            .filter(|frame| self.accepts(frame))
            .fold((0.0, 0usize), |(sum, count), frame| {
                (sum + frame.pitch_hz, count + 1)
            });
        if count == 0 {
            trace!(
                start = segment.start_time,
                frames = segment.len(),
                "degenerate segment"
            );
            return Pitch::Silence;
        }
        Pitch::from_hz(sum / count as f64)
    }

    pub fn classify(&self, segment: &Segment<'_>) -> Result<SegmentNote, DomainError> {
        let pitch = self.aggregate(segment);
        let label = self.mapper.label(pitch)?;
        let reference = self.table.nearest(pitch).copied();
        debug!(
            start = segment.start_time,
            end = segment.end_time,
            duration = ?segment.duration(),
            mean_hz = ?pitch.hz(),
            label = ?label.as_ref().map(|l| l.name.as_str()),
            "classified segment"
        );
        Ok(SegmentNote {
            start_time: segment.start_time,
            end_time: segment.end_time,
            frame_count: segment.len(),
            mean_hz: pitch.hz(),
            label,
            reference,
        })
    }
}

/// Whether a frame carries a usable measurement: a real pitch, and enough
/// confidence when a threshold is set.
pub(crate) fn is_usable(frame: &Frame, min_confidence: Option<f32>) -> bool {
    if frame.pitch().is_silence() {
        return false;
    }
    match min_confidence {
        Some(min) => frame.confidence >= min,
        None => true,
    }
}

impl Default for NoteAggregator {
    fn default() -> Self {
        Self::new(None, RangePolicy::default())
    }
}
