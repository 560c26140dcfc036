pub mod aggregate;
pub mod encoder;
pub mod pipeline;
pub mod segment;
pub mod tracker;

pub use aggregate::NoteAggregator;
pub use encoder::{EncoderSession, EventEncoder, VoiceState};
pub use pipeline::{SegmentedTranscription, TranscriptionJob, TranscriptionPipeline};
pub use segment::OnsetSegmenter;
pub use tracker::FrameNoteTracker;
