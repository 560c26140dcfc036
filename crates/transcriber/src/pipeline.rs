use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use pitchscribe_domain::{
    DetectorCapture, EncodedTrack, Frame, NoteDetection, NoteOnset, Onset, RawNoteDetection,
    SegmentNote, TickClock, TranscriptionConfig, TranscriptionReport,
};

use crate::aggregate::NoteAggregator;
use crate::encoder::EventEncoder;
use crate::segment::OnsetSegmenter;
use crate::tracker::FrameNoteTracker;

/// Velocity given to notes recovered from onset segments.
pub const SEGMENT_VELOCITY: u8 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionJob {
    pub capture_path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentedTranscription {
    pub notes: Vec<SegmentNote>,
    pub track: EncodedTrack,
}

pub struct TranscriptionPipeline {
    config: TranscriptionConfig,
    segmenter: OnsetSegmenter,
    aggregator: NoteAggregator,
    tracker: FrameNoteTracker,
    encoder: EventEncoder,
}

impl TranscriptionPipeline {
    pub fn new(config: TranscriptionConfig) -> Result<Self> {
        config.validate().context("invalid transcription config")?;
        Ok(Self {
            segmenter: OnsetSegmenter,
            aggregator: NoteAggregator::from_config(&config),
            tracker: FrameNoteTracker::from_config(&config),
            encoder: EventEncoder::new(&config)?,
            config,
        })
    }

    pub fn config(&self) -> &TranscriptionConfig {
        &self.config
    }

    /// Onset segmentation, per-segment aggregation and labelling. Each
    /// labelled segment starts a note at its onset; a silent segment releases
    /// the sounding note.
    #[instrument(skip_all, fields(frames = frames.len(), onsets = onsets.len()))]
    pub fn transcribe_segments(
        &self,
        frames: &[Frame],
        onsets: &[Onset],
    ) -> Result<SegmentedTranscription> {
        let segments = self.segmenter.segment(frames, onsets)?;
        let notes = segments
            .iter()
            .map(|segment| self.aggregator.classify(segment))
            .collect::<Result<Vec<_>, _>>()?;

        let clock = self.encoder.clock();
        let detections = segment_detections(&notes, clock);
        let end_frame = onsets.last().map(|onset| clock.seconds_to_frames(onset.time));
        let track = self.encoder.encode(detections, end_frame)?;
        info!(
            segments = notes.len(),
            labelled = notes.iter().filter(|note| !note.is_silent()).count(),
            "segment transcription finished"
        );
        Ok(SegmentedTranscription { notes, track })
    }

    /// Frame-by-frame transcription of the pitch channel, without segmentation.
    #[instrument(skip_all, fields(frames = frames.len()))]
    pub fn transcribe_frames(&self, frames: &[Frame]) -> Result<EncodedTrack> {
        let detections = self.tracker.track(frames)?;
        let end_frame = frames
            .last()
            .map(|frame| frame.end_position(self.config.hop_size))
            .transpose()?;
        Ok(self.encoder.encode(detections, end_frame)?)
    }

    /// Encodes the detector's own note channel.
    #[instrument(skip_all, fields(detections = detections.len()))]
    pub fn transcribe_detections(&self, detections: &[RawNoteDetection]) -> Result<EncodedTrack> {
        Ok(self.encoder.encode_raw(detections.iter().copied(), None)?)
    }

    /// Runs every path the capture has data for.
    #[instrument(skip_all)]
    pub fn run(&self, capture: &DetectorCapture) -> Result<TranscriptionReport> {
        let overridden = self
            .config
            .clone()
            .with_overrides(capture.sample_rate, capture.hop_size);
        if overridden != self.config {
            debug!(
                sample_rate = overridden.sample_rate,
                hop_size = overridden.hop_size,
                "capture overrides run parameters"
            );
            return TranscriptionPipeline::new(overridden)?.run_with_config(capture);
        }
        self.run_with_config(capture)
    }

    fn run_with_config(&self, capture: &DetectorCapture) -> Result<TranscriptionReport> {
        let mut report = TranscriptionReport::new(self.encoder.header());
        if capture.onsets.len() >= 2 {
            let segmented = self
                .transcribe_segments(&capture.frames, &capture.onsets)
                .context("segment transcription")?;
            report.segments = segmented.notes;
            report.segment_track = Some(segmented.track);
        }
        if !capture.frames.is_empty() {
            report.frame_track = Some(
                self.transcribe_frames(&capture.frames)
                    .context("frame transcription")?,
            );
        }
        if !capture.detections.is_empty() {
            report.detection_track = Some(
                self.transcribe_detections(&capture.detections)
                    .context("detection transcription")?,
            );
        }
        Ok(report)
    }

    #[instrument(skip(self))]
    pub fn transcribe(&self, job: &TranscriptionJob) -> Result<TranscriptionReport> {
        info!(path = %job.capture_path, "loading detector capture");
        let capture = DetectorCapture::load(&job.capture_path)
            .with_context(|| format!("load capture {}", job.capture_path))?;
        self.run(&capture)
    }
}

/// One detection per segment start. Segments without frames carry no
/// measurement and are skipped.
fn segment_detections(notes: &[SegmentNote], clock: &TickClock) -> Vec<NoteDetection> {
    let mut detections: Vec<NoteDetection> = Vec::new();
    let mut sounding: Option<u8> = None;
    for note in notes.iter().filter(|note| note.frame_count > 0) {
        let frame = clock.seconds_to_frames(note.start_time);
        if detections.last().is_some_and(|last| frame <= last.frame) {
            debug!(frame, "segment starts on an already used frame, skipping");
            continue;
        }
        match &note.label {
            Some(label) => {
                detections.push(NoteDetection {
                    frame,
                    note_on: Some(NoteOnset {
                        midi: label.midi_number,
                        velocity: SEGMENT_VELOCITY,
                    }),
                    note_off: sounding,
                });
                sounding = Some(label.midi_number);
            }
            None => {
                if let Some(previous) = sounding.take() {
                    detections.push(NoteDetection::off(frame, previous));
                }
            }
        }
    }
    detections
}
