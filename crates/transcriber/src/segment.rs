use tracing::{debug, instrument};

use pitchscribe_domain::{DomainError, Frame, Onset, Segment};

/// Splits a frame stream into one segment per inter-onset interval.
#[derive(Clone, Copy, Debug, Default)]
pub struct OnsetSegmenter;

impl OnsetSegmenter {
    /// Segment `i` covers `[frame(onset_i), frame(onset_i+1))`, where
    /// `frame(t)` is the frame nearest to `t`. The last segment also keeps
    /// the frame at the final onset.
    #[instrument(skip_all, fields(frames = frames.len(), onsets = onsets.len()))]
    pub fn segment<'a>(
        &self,
        frames: &'a [Frame],
        onsets: &[Onset],
    ) -> Result<Vec<Segment<'a>>, DomainError> {
        check_onsets(onsets)?;
        check_frames(frames)?;
        if onsets.len() < 2 {
            debug!("fewer than two onsets, nothing to segment");
            return Ok(Vec::new());
        }

        let bounds: Vec<usize> = onsets
            .iter()
            .map(|onset| nearest_frame(frames, onset.time))
            .collect();
        let last = onsets.len() - 2;
        let segments: Vec<Segment<'a>> = onsets
            .windows(2)
            .zip(bounds.windows(2))
            .enumerate()
            .map(|(position, (pair, span))| {
                let end = if position == last {
                    (span[1] + 1).min(frames.len())
                } else {
                    span[1]
                };
                Segment::new(pair[0].time, pair[1].time, &frames[span[0]..end])
            })
            .collect();
        debug!(
            segments = segments.len(),
            empty = segments.iter().filter(|s| s.is_empty()).count(),
            "segmented frames"
        );
        Ok(segments)
    }
}

/// Index of the frame whose time is closest to `time`; ties go to the earlier frame.
/// Frames must be sorted by time.
pub fn nearest_frame(frames: &[Frame], time: f64) -> usize {
    let upper = frames.partition_point(|frame| frame.time < time);
    if upper == 0 {
        return 0;
    }
    if upper == frames.len() {
        return frames.len() - 1;
    }
    let below = upper - 1;
    if time - frames[below].time <= frames[upper].time - time {
        below
    } else {
        upper
    }
}

fn check_onsets(onsets: &[Onset]) -> Result<(), DomainError> {
    if let Some(onset) = onsets.iter().find(|o| !o.time.is_finite() || o.time < 0.0) {
        return Err(DomainError::validation(format!(
            "onset time {} must be finite and >= 0",
            onset.time
        )));
    }
    match onsets.windows(2).find(|pair| pair[1].time <= pair[0].time) {
        Some(pair) => Err(DomainError::non_monotonic(
            "onsets",
            pair[0].time,
            pair[1].time,
        )),
        None => Ok(()),
    }
}

fn check_frames(frames: &[Frame]) -> Result<(), DomainError> {
    for pair in frames.windows(2) {
        if pair[1].index <= pair[0].index {
            return Err(DomainError::non_monotonic(
                "frame indices",
                pair[0].index as f64,
                pair[1].index as f64,
            ));
        }
        if pair[1].time < pair[0].time {
            return Err(DomainError::non_monotonic(
                "frame times",
                pair[0].time,
                pair[1].time,
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(count: u64) -> Vec<Frame> {
        (0..count)
            .map(|index| Frame::new(index, index as f64 * 0.1, 220.0, 1.0))
            .collect()
    }

    fn onsets(times: &[f64]) -> Vec<Onset> {
        times.iter().copied().map(Onset::new).collect()
    }

    #[test]
    fn fewer_than_two_onsets_yield_nothing() {
        let frames = frames(10);
        let segmenter = OnsetSegmenter;
        assert!(segmenter.segment(&frames, &[]).unwrap().is_empty());
        assert!(segmenter
            .segment(&frames, &onsets(&[0.3]))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn k_onsets_give_k_minus_one_contiguous_segments() {
        let frames = frames(20);
        let onsets = onsets(&[0.2, 0.5, 0.9, 1.4]);
        let segments = OnsetSegmenter.segment(&frames, &onsets).unwrap();
        assert_eq!(segments.len(), 3);

        let lengths: Vec<usize> = segments.iter().map(Segment::len).collect();
        assert_eq!(lengths, vec![3, 4, 6]);

        let rebuilt: Vec<Frame> = segments
            .iter()
            .flat_map(|segment| segment.frames.iter().copied())
            .collect();
        assert_eq!(rebuilt.as_slice(), &frames[2..=14]);
        assert_eq!(segments[1].start_time, 0.5);
        assert_eq!(segments[1].end_time, 0.9);
    }

    #[test]
    fn onsets_on_the_same_frame_give_an_empty_segment() {
        let frames = frames(10);
        let onsets = onsets(&[0.0, 0.21, 0.24, 0.6]);
        let segments = OnsetSegmenter.segment(&frames, &onsets).unwrap();
        assert_eq!(segments.len(), 3);
        assert!(segments[1].is_empty());
        assert_eq!(segments[2].frames.first().unwrap().index, 2);
    }

    #[test]
    fn onsets_beyond_the_frames_clamp_to_the_edges() {
        let frames = frames(5);
        let segments = OnsetSegmenter
            .segment(&frames, &onsets(&[0.0, 7.5]))
            .unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].len(), 5);

        let none: Vec<Frame> = Vec::new();
        let segments = OnsetSegmenter
            .segment(&none, &onsets(&[0.0, 1.0, 2.0]))
            .unwrap();
        assert_eq!(segments.len(), 2);
        assert!(segments.iter().all(Segment::is_empty));
    }

    #[test]
    fn nearest_frame_breaks_ties_towards_earlier() {
        let frames = frames(4);
        assert_eq!(nearest_frame(&frames, 0.15), 1);
        assert_eq!(nearest_frame(&frames, 0.16), 2);
        assert_eq!(nearest_frame(&frames, -1.0), 0);
        assert_eq!(nearest_frame(&frames, 10.0), 3);
    }

    #[test]
    fn rejects_non_monotonic_onsets() {
        let frames = frames(10);
        let err = OnsetSegmenter
            .segment(&frames, &onsets(&[0.0, 0.5, 0.5]))
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::NonMonotonicInput { what: "onsets", .. }
        ));
        assert!(OnsetSegmenter
            .segment(&frames, &onsets(&[-0.1, 0.5]))
            .is_err());
    }

    #[test]
    fn rejects_non_monotonic_frames() {
        let mut frames = frames(5);
        frames.swap(1, 2);
        let err = OnsetSegmenter
            .segment(&frames, &onsets(&[0.0, 0.3]))
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
