//! Turn-State Tracker: the per-session state machine deciding when a
//! speaker's turn has ended.

use std::collections::VecDeque;

/// Emitted by `detect_end_of_turn` alongside its boolean verdict.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnStateEvent {
    pub speech_duration_ms: f64,
    pub silence_duration_ms: f64,
}

pub struct TurnStateTracker {
    speech_active: bool,
    speech_start_ts: Option<f64>,
    last_speech_ts: Option<f64>,
    silence_start_ts: Option<f64>,
    energy_history: VecDeque<f32>,
    speaking_rate_history: VecDeque<f64>,
    energy_history_cap: usize,
    speaking_rate_history_cap: usize,
    base_eot_silence_ms: f64,
    eot_adaptive_enabled: bool,
}

impl TurnStateTracker {
    pub fn new(
        energy_history_cap: usize,
        speaking_rate_history_cap: usize,
        base_eot_silence_ms: u64,
        eot_adaptive_enabled: bool,
    ) -> Self {
        Self {
            speech_active: false,
            speech_start_ts: None,
            last_speech_ts: None,
            silence_start_ts: None,
            energy_history: VecDeque::with_capacity(energy_history_cap),
            speaking_rate_history: VecDeque::with_capacity(speaking_rate_history_cap),
            energy_history_cap,
            speaking_rate_history_cap,
            base_eot_silence_ms: base_eot_silence_ms as f64,
            eot_adaptive_enabled,
        }
    }

    /// Floor of 0.01 until at least 10 samples are present, otherwise the
    /// mean of the last 20 energy readings.
    pub fn background_noise(&self) -> f32 {
        if self.energy_history.len() < 10 {
            return 0.01;
        }
        let tail: Vec<f32> = self
            .energy_history
            .iter()
            .rev()
            .take(20)
            .copied()
            .collect();
        tail.iter().sum::<f32>() / tail.len() as f32
    }

    fn push_energy(&mut self, energy: f32) {
        if self.energy_history.len() == self.energy_history_cap {
            self.energy_history.pop_front();
        }
        self.energy_history.push_back(energy);
    }

    fn push_speaking_rate(&mut self, ms: f64) {
        if self.speaking_rate_history.len() == self.speaking_rate_history_cap {
            self.speaking_rate_history.pop_front();
        }
        self.speaking_rate_history.push_back(ms);
    }

    /// `base` if adaptive mode is disabled or fewer than 3 samples of
    /// speaking-rate history exist; otherwise `0.7*base` for fast speakers
    /// (mean speech duration < 1000ms), `1.2*base` for slow speakers (mean
    /// > 3000ms), and `base` in between.
    fn adaptive_eot_threshold(&self) -> f64 {
        if !self.eot_adaptive_enabled || self.speaking_rate_history.len() < 3 {
            return self.base_eot_silence_ms;
        }
        let avg: f64 = self.speaking_rate_history.iter().sum::<f64>()
            / self.speaking_rate_history.len() as f64;
        if avg < 1000.0 {
            self.base_eot_silence_ms * 0.7
        } else if avg > 3000.0 {
            self.base_eot_silence_ms * 1.2
        } else {
            self.base_eot_silence_ms
        }
    }

    /// Advances the state machine by one speech/silence decision at
    /// `current_time` (seconds) and an energy reading for the same frame.
    /// Returns `(is_end_of_turn, event)`.
    pub fn detect_end_of_turn(
        &mut self,
        is_speech: bool,
        energy: f32,
        current_time: f64,
    ) -> (bool, TurnStateEvent) {
        self.push_energy(energy);

        if is_speech {
            if !self.speech_active {
                self.speech_active = true;
                self.speech_start_ts = Some(current_time);
            }
            self.last_speech_ts = Some(current_time);
            self.silence_start_ts = None;
            return (false, TurnStateEvent::default());
        }

        if !self.speech_active {
            // Idle and non-speech: no turn in progress, nothing to end.
            return (false, TurnStateEvent::default());
        }

        if self.silence_start_ts.is_none() {
            self.silence_start_ts = Some(current_time);
        }

        let silence_ms = (current_time - self.silence_start_ts.unwrap()) * 1000.0;
        let threshold_ms = self.adaptive_eot_threshold();

        if silence_ms >= threshold_ms {
            let speech_ms = match (self.speech_start_ts, self.last_speech_ts) {
                (Some(start), Some(last)) => (last - start) * 1000.0,
                _ => 0.0,
            };
            self.push_speaking_rate(speech_ms);
            let event = TurnStateEvent {
                speech_duration_ms: speech_ms,
                silence_duration_ms: silence_ms,
            };
            self.speech_active = false;
            self.speech_start_ts = None;
            self.last_speech_ts = None;
            self.silence_start_ts = None;
            return (true, event);
        }

        (false, TurnStateEvent::default())
    }

    pub fn reset(&mut self) {
        self.speech_active = false;
        self.speech_start_ts = None;
        self.last_speech_ts = None;
        self.silence_start_ts = None;
        self.energy_history.clear();
        self.speaking_rate_history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn idle_non_speech_never_ends_turn() {
        let mut tracker = TurnStateTracker::new(100, 10, 700, true);
        let (eot, event) = tracker.detect_end_of_turn(false, 0.001, 0.0);
        assert!(!eot);
        assert_eq!(event, TurnStateEvent::default());
    }

    #[test]
    fn sustained_silence_after_speech_ends_turn() {
        let mut tracker = TurnStateTracker::new(100, 10, 500, true);
        tracker.detect_end_of_turn(true, 0.05, 0.0);
        tracker.detect_end_of_turn(true, 0.05, 0.2);
        tracker.detect_end_of_turn(false, 0.001, 0.3);
        let (eot, _) = tracker.detect_end_of_turn(false, 0.001, 1.0);
        assert!(eot);
    }

    #[test]
    fn reset_is_idempotent_and_clears_state() {
        let mut tracker = TurnStateTracker::new(100, 10, 500, true);
        tracker.detect_end_of_turn(true, 0.05, 0.0);
        tracker.reset();
        tracker.reset();
        assert_eq!(tracker.background_noise(), 0.01);
    }

    #[test]
    fn background_noise_floors_until_enough_samples() {
        let mut tracker = TurnStateTracker::new(100, 10, 500, true);
        for i in 0..5 {
            tracker.detect_end_of_turn(false, 0.5, i as f64 * 0.02);
        }
        assert_eq!(tracker.background_noise(), 0.01);
    }

    #[test]
    fn adaptive_threshold_falls_back_to_base_below_three_samples() {
        let mut tracker = TurnStateTracker::new(100, 10, 600, true);
        tracker.push_speaking_rate(500.0);
        tracker.push_speaking_rate(500.0);
        assert_eq!(tracker.adaptive_eot_threshold(), 600.0);
    }

    #[test]
    fn adaptive_threshold_is_07x_base_for_fast_speakers() {
        let mut tracker = TurnStateTracker::new(100, 10, 600, true);
        for _ in 0..3 {
            tracker.push_speaking_rate(500.0);
        }
        assert_relative_eq!(tracker.adaptive_eot_threshold(), 420.0, epsilon = 1e-9);
    }

    #[test]
    fn adaptive_threshold_is_12x_base_for_slow_speakers() {
        let mut tracker = TurnStateTracker::new(100, 10, 600, true);
        for _ in 0..3 {
            tracker.push_speaking_rate(4000.0);
        }
        assert_relative_eq!(tracker.adaptive_eot_threshold(), 720.0, epsilon = 1e-9);
    }

    #[test]
    fn adaptive_threshold_is_1x_base_in_between() {
        let mut tracker = TurnStateTracker::new(100, 10, 600, true);
        for _ in 0..3 {
            tracker.push_speaking_rate(2000.0);
        }
        assert_eq!(tracker.adaptive_eot_threshold(), 600.0);
    }

    #[test]
    fn disabled_adaptive_mode_always_uses_base() {
        let mut tracker = TurnStateTracker::new(100, 10, 600, false);
        for _ in 0..3 {
            tracker.push_speaking_rate(4000.0);
        }
        assert_eq!(tracker.adaptive_eot_threshold(), 600.0);
    }
}
