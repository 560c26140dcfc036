use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};

use pitchscribe_domain::{
    ClockState, DomainError, EncodedTrack, NoteDetection, NoteEvent, RangePolicy,
    RawNoteDetection, StreamHeader, TickClock, TranscriptionConfig,
};

/// The single voice tracked by the encoder.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Sounding(u8),
}

/// Turns detections into a delta-timed note-on/note-off stream.
#[derive(Clone, Debug)]
pub struct EventEncoder {
    clock: TickClock,
    header: StreamHeader,
    policy: RangePolicy,
    force_final_note_off: bool,
}

impl EventEncoder {
    pub fn new(config: &TranscriptionConfig) -> Result<Self, DomainError> {
        Ok(Self {
            clock: config.clock()?,
            header: config.header(),
            policy: config.range_policy,
            force_final_note_off: config.force_final_note_off,
        })
    }

    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    pub fn header(&self) -> StreamHeader {
        self.header
    }

    /// Fresh run state: tick zero, no sounding note.
    pub fn session(&self) -> EncoderSession {
        EncoderSession {
            clock: ClockState::new(self.clock),
            voice: VoiceState::Idle,
            track: EncodedTrack::new(self.header),
            force_final_note_off: self.force_final_note_off,
        }
    }

    /// Encodes a whole pass. Any error discards the events produced so far.
    #[instrument(skip_all)]
    pub fn encode<I>(
        &self,
        detections: I,
        end_frame: Option<u64>,
    ) -> Result<EncodedTrack, DomainError>
    where
        I: IntoIterator<Item = NoteDetection>,
    {
        let mut session = self.session();
        for detection in detections {
            session.push(detection)?;
        }
        session.finish(end_frame)
    }

    /// Like [`EventEncoder::encode`], validating raw detector tuples first.
    #[instrument(skip_all)]
    pub fn encode_raw<I>(
        &self,
        detections: I,
        end_frame: Option<u64>,
    ) -> Result<EncodedTrack, DomainError>
    where
        I: IntoIterator<Item = RawNoteDetection>,
    {
        let mut session = self.session();
        for raw in detections {
            session.push(NoteDetection::from_raw(raw, self.policy)?)?;
        }
        session.finish(end_frame)
    }
}

/// State of one encoding pass.
#[derive(Debug)]
pub struct EncoderSession {
    clock: ClockState,
    voice: VoiceState,
    track: EncodedTrack,
    force_final_note_off: bool,
}

impl EncoderSession {
    pub fn voice(&self) -> VoiceState {
        self.voice
    }

    pub fn push(&mut self, detection: NoteDetection) -> Result<(), DomainError> {
        let detection = detection.normalized();
        self.clock.observe(detection.frame)?;
        let frame = detection.frame;

        if let Some(onset) = detection.note_on {
            let delta = self.clock.advance_to(frame)?;
            let on_delta = match self.voice {
                VoiceState::Sounding(current) => {
                    if let Some(reported) = detection.note_off {
                        if reported != current {
                            warn!(
                                current,
                                reported,
                                frame,
                                "closing note differs from sounding note"
                            );
                        }
                    }
                    self.emit(NoteEvent::note_off(current, delta));
                    0
                }
                VoiceState::Idle => {
                    if let Some(reported) = detection.note_off {
                        debug!(reported, frame, "release reported while idle");
                    }
                    delta
                }
            };
            self.emit(NoteEvent::note_on(onset.midi, onset.velocity, on_delta));
            self.voice = VoiceState::Sounding(onset.midi);
            return Ok(());
        }

        match (self.voice, detection.note_off) {
            (VoiceState::Sounding(current), Some(reported)) if reported == current => {
                let delta = self.clock.advance_to(frame)?;
                self.emit(NoteEvent::note_off(current, delta));
                self.voice = VoiceState::Idle;
            }
            (VoiceState::Sounding(current), Some(reported)) => {
                warn!(
                    current,
                    reported,
                    frame,
                    "release does not match sounding note, ignoring"
                );
            }
            (VoiceState::Idle, Some(reported)) => {
                debug!(reported, frame, "release reported while idle");
            }
            (_, None) => {}
        }
        Ok(())
    }

    /// Ends the pass. With `force_final_note_off`, a sounding note is closed
    /// at `end_frame`, or at the last pushed frame when no end is given.
    pub fn finish(mut self, end_frame: Option<u64>) -> Result<EncodedTrack, DomainError> {
        if let (Some(end), Some(last)) = (end_frame, self.clock.last_frame()) {
            if end < last {
                return Err(DomainError::non_monotonic(
                    "end of stream",
                    last as f64,
                    end as f64,
                ));
            }
        }
        if let VoiceState::Sounding(current) = self.voice {
            if self.force_final_note_off {
                let frame = end_frame.or(self.clock.last_frame()).unwrap_or_default();
                let delta = self.clock.advance_to(frame)?;
                self.emit(NoteEvent::note_off(current, delta));
                self.voice = VoiceState::Idle;
            } else {
                debug!(current, "leaving final note unterminated");
            }
        }
        info!(
            events = self.track.events.len(),
            notes = self.track.note_count(),
            last_tick = self.clock.last_emitted_tick(),
            seconds = self
                .clock
                .clock()
                .ticks_to_seconds(self.clock.last_emitted_tick()),
            "encoded track"
        );
        Ok(self.track)
    }

    fn emit(&mut self, event: NoteEvent) {
        trace!(?event, tick = self.clock.last_emitted_tick(), "emit");
        self.track.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitchscribe_domain::NoteEventKind;

    fn encoder(force_final_note_off: bool) -> EventEncoder {
        EventEncoder::new(&TranscriptionConfig {
            force_final_note_off,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn note_change_emits_off_before_on_at_the_same_tick() {
        let track = encoder(false)
            .encode(
                vec![
                    NoteDetection::on(0, 60, 100),
                    NoteDetection::on(4_410, 62, 90).closing(60),
                ],
                None,
            )
            .unwrap();
        assert_eq!(
            track.events,
            vec![
                NoteEvent::note_on(60, 100, 0),
                NoteEvent::note_off(60, 96),
                NoteEvent::note_on(62, 90, 0),
            ]
        );
        assert_eq!(track.absolute_ticks(), vec![0, 96, 96]);
    }

    #[test]
    fn quarter_second_is_240_ticks() {
        let track = encoder(false)
            .encode(
                vec![
                    NoteDetection::on(0, 60, 100),
                    NoteDetection::on(11_025, 62, 100).closing(60),
                ],
                None,
            )
            .unwrap();
        assert_eq!(track.events[1], NoteEvent::note_off(60, 240));
        assert_eq!(track.events[2].delta_ticks, 0);
    }

    #[test]
    fn running_sum_matches_the_clock() {
        let encoder = encoder(true);
        let frames = [512u64, 9_000, 9_001, 30_000, 61_234];
        let detections: Vec<NoteDetection> = frames
            .iter()
            .enumerate()
            .map(|(i, &frame)| NoteDetection::on(frame, 60 + i as u8, 80))
            .collect();
        let track = encoder.encode(detections, Some(100_000)).unwrap();

        let absolute = track.absolute_ticks();
        let clock = encoder.clock();
        let on_ticks: Vec<u64> = track
            .events
            .iter()
            .zip(&absolute)
            .filter(|(event, _)| event.kind == NoteEventKind::NoteOn)
            .map(|(_, tick)| *tick)
            .collect();
        let expected: Vec<u64> = frames.iter().map(|&f| clock.frames_to_ticks(f)).collect();
        assert_eq!(on_ticks, expected);
        assert_eq!(*absolute.last().unwrap(), clock.frames_to_ticks(100_000));
    }

    #[test]
    fn new_note_closes_the_voice_even_without_a_reported_release() {
        let track = encoder(false)
            .encode(
                vec![NoteDetection::on(0, 60, 100), NoteDetection::on(22_050, 64, 100)],
                None,
            )
            .unwrap();
        assert_eq!(track.events[1], NoteEvent::note_off(60, 480));
        assert_eq!(track.pending_note(), Some(64));
    }

    #[test]
    fn mismatched_release_closes_the_sounding_note() {
        let track = encoder(false)
            .encode(
                vec![
                    NoteDetection::on(0, 60, 100),
                    NoteDetection::on(22_050, 64, 100).closing(59),
                ],
                None,
            )
            .unwrap();
        assert_eq!(track.events[1].midi_number, 60);
        assert_eq!(track.events[1].kind, NoteEventKind::NoteOff);
    }

    #[test]
    fn release_only_detection_returns_to_idle() {
        let encoder = encoder(false);
        let mut session = encoder.session();
        session.push(NoteDetection::on(0, 60, 100)).unwrap();
        session.push(NoteDetection::off(11_025, 59)).unwrap();
        assert_eq!(session.voice(), VoiceState::Sounding(60));
        session.push(NoteDetection::off(22_050, 60)).unwrap();
        assert_eq!(session.voice(), VoiceState::Idle);
        session.push(NoteDetection::off(33_075, 60)).unwrap();
        session.push(NoteDetection::on(44_100, 62, 70)).unwrap();

        let track = session.finish(None).unwrap();
        assert_eq!(
            track.events,
            vec![
                NoteEvent::note_on(60, 100, 0),
                NoteEvent::note_off(60, 480),
                NoteEvent::note_on(62, 70, 480),
            ]
        );
    }

    #[test]
    fn empty_detections_do_not_move_the_clock() {
        let raw = vec![
            RawNoteDetection {
                frame: 0,
                note_on: 0,
                velocity: 0,
                note_off: 0,
            },
            RawNoteDetection {
                frame: 22_050,
                note_on: 67,
                velocity: 100,
                note_off: 0,
            },
        ];
        let track = encoder(false).encode_raw(raw, None).unwrap();
        assert_eq!(track.events, vec![NoteEvent::note_on(67, 100, 480)]);
    }

    #[test]
    fn non_monotonic_frames_abort_without_output() {
        let result = encoder(false).encode(
            vec![
                NoteDetection::on(1_000, 60, 100),
                NoteDetection::on(2_000, 62, 100),
                NoteDetection::on(2_000, 64, 100),
            ],
            None,
        );
        assert!(matches!(result, Err(DomainError::NonMonotonicInput { .. })));
    }

    #[test]
    fn zero_velocity_note_on_releases_instead_of_sounding() {
        let raw = vec![
            RawNoteDetection {
                frame: 0,
                note_on: 60,
                velocity: 100,
                note_off: 0,
            },
            RawNoteDetection {
                frame: 22_050,
                note_on: 60,
                velocity: 0,
                note_off: 0,
            },
        ];
        let track = encoder(true).encode_raw(raw, Some(44_100)).unwrap();
        assert_eq!(
            track.events,
            vec![NoteEvent::note_on(60, 100, 0), NoteEvent::note_off(60, 480)]
        );
        assert_eq!(track.pending_note(), None);
    }

    #[test]
    fn tick_overflow_at_the_extreme_valid_config_is_an_error() {
        let config = TranscriptionConfig {
            sample_rate: 1,
            bpm: 60_000_000.0,
            ticks_per_beat: 32_767,
            ..Default::default()
        };
        config.validate().unwrap();
        let result = EventEncoder::new(&config).unwrap().encode(
            vec![
                NoteDetection::on(1_000_000_000, 60, 100),
                NoteDetection::on(2_000_000_000, 62, 100),
            ],
            None,
        );
        assert!(matches!(result, Err(DomainError::TickOverflow { .. })));
    }

    #[test]
    fn unterminated_note_is_accepted_by_default() {
        let track = encoder(false)
            .encode(vec![NoteDetection::on(0, 60, 100)], Some(44_100))
            .unwrap();
        assert_eq!(track.events.len(), 1);
        assert_eq!(track.pending_note(), Some(60));
    }

    #[test]
    fn forced_final_note_off() {
        let encoder = encoder(true);
        let track = encoder
            .encode(vec![NoteDetection::on(0, 60, 100)], Some(44_100))
            .unwrap();
        assert_eq!(track.events[1], NoteEvent::note_off(60, 960));
        assert_eq!(track.pending_note(), None);

        let track = encoder
            .encode(
                vec![NoteDetection::on(0, 60, 100), NoteDetection::off(22_050, 57)],
                None,
            )
            .unwrap();
        assert_eq!(track.events[1], NoteEvent::note_off(60, 480));
    }

    #[test]
    fn end_frame_before_last_detection_is_rejected() {
        let result = encoder(true).encode(vec![NoteDetection::on(5_000, 60, 100)], Some(4_000));
        assert!(result.is_err());
    }

    #[test]
    fn raw_detections_follow_range_policy() {
        let raw = vec![RawNoteDetection {
            frame: 0,
            note_on: 140,
            velocity: 100,
            note_off: 0,
        }];
        let strict = EventEncoder::new(&TranscriptionConfig {
            range_policy: RangePolicy::Reject,
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(
            strict.encode_raw(raw.clone(), None),
            Err(DomainError::OutOfRangeNote { value: 140, .. })
        ));
        let track = encoder(false).encode_raw(raw, None).unwrap();
        assert_eq!(track.events[0].midi_number, 127);
    }

    #[test]
    fn sessions_start_fresh() {
        let encoder = encoder(false);
        let first = encoder
            .encode(vec![NoteDetection::on(44_100, 60, 100)], None)
            .unwrap();
        let second = encoder
            .encode(vec![NoteDetection::on(44_100, 60, 100)], None)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first.events[0].delta_ticks, 960);
    }

    #[test]
    fn invalid_configuration_is_rejected_up_front() {
        let config = TranscriptionConfig {
            sample_rate: 0,
            ..Default::default()
        };
        assert!(matches!(
            EventEncoder::new(&config),
            Err(DomainError::Configuration { .. })
        ));
    }
}
