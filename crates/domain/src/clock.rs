use serde::{Deserialize, Serialize};

use crate::DomainError;

pub const MICROS_PER_MINUTE: f64 = 60_000_000.0;
/// Largest tempo a 24-bit set-tempo message can carry.
pub const MAX_TEMPO_MICROS: u32 = 0x00FF_FFFF;
/// Metrical division is a 15-bit field.
pub const MAX_TICKS_PER_BEAT: u16 = 0x7FFF;

/// Beats per minute to microseconds per beat, rounded to the nearest microsecond.
pub fn bpm_to_tempo(bpm: f64) -> u32 {
    (MICROS_PER_MINUTE / bpm).round() as u32
}

pub fn tempo_to_bpm(tempo_micros_per_beat: u32) -> f64 {
    MICROS_PER_MINUTE / tempo_micros_per_beat as f64
}

/// Run-level metadata handed to the event sink once, before any event.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamHeader {
    pub ticks_per_beat: u16,
    pub tempo_micros_per_beat: u32,
    pub time_signature_numerator: u8,
    pub time_signature_denominator: u8,
}

/// Converts sample-frame positions into musical ticks for one fixed
/// sample rate / tempo / resolution triple.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickClock {
    sample_rate: u32,
    ticks_per_beat: u16,
    tempo_micros_per_beat: u32,
}

impl TickClock {
    pub fn new(
        sample_rate: u32,
        ticks_per_beat: u16,
        tempo_micros_per_beat: u32,
    ) -> Result<Self, DomainError> {
        if sample_rate == 0 {
            return Err(DomainError::configuration("sample_rate", "must be > 0"));
        }
        if ticks_per_beat == 0 {
            return Err(DomainError::configuration("ticks_per_beat", "must be > 0"));
        }
        if tempo_micros_per_beat == 0 {
            return Err(DomainError::configuration(
                "tempo_micros_per_beat",
                "must be > 0",
            ));
        }
        Ok(Self {
            sample_rate,
            ticks_per_beat,
            tempo_micros_per_beat,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn ticks_per_beat(&self) -> u16 {
        self.ticks_per_beat
    }

    pub fn tempo_micros_per_beat(&self) -> u32 {
        self.tempo_micros_per_beat
    }

    /// `seconds * ticks_per_beat * 1e6 / tempo`, truncated, with
    /// `seconds = frame / sample_rate`. Evaluated as one integer division so
    /// the result never depends on float rounding. Saturates at `u64::MAX`.
    pub fn frames_to_ticks(&self, frame: u64) -> u64 {
        self.try_frames_to_ticks(frame).unwrap_or(u64::MAX)
    }

    /// Like [`TickClock::frames_to_ticks`], failing when the tick position
    /// does not fit in a `u64`.
    pub fn try_frames_to_ticks(&self, frame: u64) -> Result<u64, DomainError> {
        // At most 64 + 15 + 20 bits, so the product always fits in a u128.
        let numerator = frame as u128 * self.ticks_per_beat as u128 * 1_000_000;
        let denominator = self.sample_rate as u128 * self.tempo_micros_per_beat as u128;
        u64::try_from(numerator / denominator).map_err(|_| DomainError::TickOverflow { frame })
    }

    pub fn seconds_to_ticks(&self, seconds: f64) -> u64 {
        let ticks = seconds * self.ticks_per_beat as f64 * 1_000_000.0
            / self.tempo_micros_per_beat as f64;
        ticks.max(0.0) as u64
    }

    pub fn seconds_to_frames(&self, seconds: f64) -> u64 {
        (seconds * self.sample_rate as f64).round().max(0.0) as u64
    }

    pub fn ticks_to_seconds(&self, ticks: u64) -> f64 {
        ticks as f64 * self.tempo_micros_per_beat as f64
            / (self.ticks_per_beat as f64 * 1_000_000.0)
    }
}

/// Emission bookkeeping for one encoding pass. Never shared between runs.
#[derive(Clone, Debug, PartialEq)]
pub struct ClockState {
    clock: TickClock,
    last_emitted_tick: u64,
    last_frame: Option<u64>,
}

impl ClockState {
    pub fn new(clock: TickClock) -> Self {
        Self {
            clock,
            last_emitted_tick: 0,
            last_frame: None,
        }
    }

    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    pub fn last_emitted_tick(&self) -> u64 {
        self.last_emitted_tick
    }

    pub fn last_frame(&self) -> Option<u64> {
        self.last_frame
    }

    /// Registers an input frame. Input frames must be strictly increasing.
    pub fn observe(&mut self, frame: u64) -> Result<(), DomainError> {
        if let Some(previous) = self.last_frame {
            if frame <= previous {
                return Err(DomainError::non_monotonic(
                    "detection frames",
                    previous as f64,
                    frame as f64,
                ));
            }
        }
        self.last_frame = Some(frame);
        Ok(())
    }

    /// Moves the emission cursor to `frame` and returns the delta in ticks
    /// since the previous emission.
    pub fn advance_to(&mut self, frame: u64) -> Result<u64, DomainError> {
        if let Some(previous) = self.last_frame {
            if frame < previous {
                return Err(DomainError::non_monotonic(
                    "emission frame",
                    previous as f64,
                    frame as f64,
                ));
            }
        }
        let tick = self.clock.try_frames_to_ticks(frame)?;
        let delta = tick.checked_sub(self.last_emitted_tick).ok_or_else(|| {
            DomainError::non_monotonic(
                "emitted ticks",
                self.last_emitted_tick as f64,
                tick as f64,
            )
        })?;
        self.last_emitted_tick = tick;
        self.last_frame = Some(frame);
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn default_clock() -> TickClock {
        TickClock::new(44_100, 480, 500_000).unwrap()
    }

    #[test]
    fn clock_rejects_zero_parameters() {
        assert!(TickClock::new(0, 480, 500_000).is_err());
        assert!(TickClock::new(44_100, 0, 500_000).is_err());
        assert!(TickClock::new(44_100, 480, 0).is_err());
    }

    #[test]
    fn bpm_tempo_conversion() {
        assert_eq!(bpm_to_tempo(120.0), 500_000);
        assert_eq!(bpm_to_tempo(90.0), 666_667);
        assert_relative_eq!(tempo_to_bpm(500_000), 120.0);
    }

    #[test]
    fn frames_to_ticks_truncates() {
        let clock = default_clock();
        assert_eq!(clock.frames_to_ticks(0), 0);
        // 0.1 s at 120 bpm is a fifth of a beat.
        assert_eq!(clock.frames_to_ticks(4_410), 96);
        assert_eq!(clock.frames_to_ticks(11_025), 240);
        assert_eq!(clock.frames_to_ticks(44_100), 960);
        // 91.88 ticks truncate down.
        assert_eq!(clock.frames_to_ticks(4_221), 91);
    }

    #[test]
    fn frames_to_ticks_is_monotonic() {
        let clock = TickClock::new(48_000, 96, 666_667).unwrap();
        let mut previous = 0;
        for frame in (0..200_000u64).step_by(97) {
            let ticks = clock.frames_to_ticks(frame);
            assert!(ticks >= previous);
            previous = ticks;
        }
    }

    #[test]
    fn seconds_helpers_agree_with_frames() {
        let clock = default_clock();
        assert_eq!(clock.seconds_to_ticks(0.5), 480);
        assert_eq!(clock.seconds_to_frames(0.5), 22_050);
        assert_relative_eq!(clock.ticks_to_seconds(960), 1.0);
    }

    #[test]
    fn state_reports_deltas() {
        let mut state = ClockState::new(default_clock());
        assert_eq!(state.advance_to(0).unwrap(), 0);
        assert_eq!(state.advance_to(22_050).unwrap(), 480);
        assert_eq!(state.advance_to(22_050).unwrap(), 0);
        assert_eq!(state.advance_to(44_100).unwrap(), 480);
        assert_eq!(state.last_emitted_tick(), 960);
    }

    #[test]
    fn state_rejects_backwards_frames() {
        let mut state = ClockState::new(default_clock());
        state.observe(100).unwrap();
        assert!(state.observe(100).is_err());
        assert!(state.observe(50).is_err());
        assert!(state.advance_to(99).is_err());
        assert_eq!(state.advance_to(100).unwrap(), 2);
    }

    #[test]
    fn tick_positions_beyond_u64_are_errors() {
        // One microsecond per beat at one sample per second: 32767e6 ticks per frame.
        let clock = TickClock::new(1, MAX_TICKS_PER_BEAT, 1).unwrap();
        let last_fitting = u64::MAX / (MAX_TICKS_PER_BEAT as u64 * 1_000_000);
        assert!(clock.try_frames_to_ticks(last_fitting).is_ok());
        assert_eq!(
            clock.try_frames_to_ticks(last_fitting + 1),
            Err(DomainError::TickOverflow {
                frame: last_fitting + 1
            })
        );
        assert_eq!(clock.frames_to_ticks(u64::MAX), u64::MAX);

        let mut state = ClockState::new(clock);
        assert!(state.advance_to(500_000_000).is_ok());
        assert!(matches!(
            state.advance_to(600_000_000),
            Err(DomainError::TickOverflow { .. })
        ));
    }
}
