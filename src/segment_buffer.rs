//! Segment Buffer: turns a stream of classified frames into finalized
//! `Utterance`s, with pre-roll padding and a safety-valve flush.

use std::collections::VecDeque;

use crate::ingress::Frame;
use crate::vad::bytes_to_f32;

/// One finalized utterance ready for transcription.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub samples: Vec<f32>,
    pub start_ts: f64,
    pub end_ts: f64,
    pub duration_ms: f64,
    pub audio_length_ms: f64,
    pub speech_samples: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SegmentBufferMetrics {
    pub frames_buffered: usize,
    pub utterances_emitted: u64,
    pub safety_valve_flushes: u64,
}

pub struct SegmentBuffer {
    frame_window: VecDeque<Frame>,
    frame_window_capacity: usize,
    pre_roll_frames: usize,
    current: Vec<f32>,
    current_start_ts: Option<f64>,
    /// Samples contributed by frames classified as speech, distinct from
    /// `current.len()` which also includes pre-roll and intra-turn silence
    /// padding. Gates the EoT-finalize branch and becomes
    /// `Utterance.speech_samples`.
    speech_sample_count: usize,
    in_speech: bool,
    sample_rate: u32,
    min_speech_samples: usize,
    max_speech_samples: usize,
    utterances_emitted: u64,
    safety_valve_flushes: u64,
}

impl SegmentBuffer {
    pub fn new(
        frame_window_capacity: usize,
        pre_roll_frames: usize,
        sample_rate: u32,
        min_speech_samples: usize,
        max_speech_samples: usize,
    ) -> Self {
        Self {
            frame_window: VecDeque::with_capacity(frame_window_capacity),
            frame_window_capacity,
            pre_roll_frames,
            current: Vec::new(),
            current_start_ts: None,
            speech_sample_count: 0,
            in_speech: false,
            sample_rate,
            min_speech_samples,
            max_speech_samples,
            utterances_emitted: 0,
            safety_valve_flushes: 0,
        }
    }

    fn push_window(&mut self, frame: Frame) {
        if self.frame_window.len() == self.frame_window_capacity {
            self.frame_window.pop_front();
        }
        self.frame_window.push_back(frame);
    }

    /// Seeds `current` from the frames preceding the one that just
    /// triggered the speech transition (which is the most recent entry in
    /// `frame_window` at the time this is called, and is accumulated
    /// separately by the caller) so pre-roll audio isn't duplicated.
    fn seed_pre_roll(&mut self) {
        let tail: Vec<&Frame> = self
            .frame_window
            .iter()
            .rev()
            .skip(1)
            .take(self.pre_roll_frames)
            .collect();
        for f in tail.into_iter().rev() {
            self.current
                .extend(bytes_to_f32(&f.payload));
        }
    }

    /// Feeds one frame plus its classification and the turn tracker's
    /// end-of-turn verdict. Returns `Some(Utterance)` exactly when an
    /// utterance is finalized (either by end-of-turn or the safety valve).
    pub fn push(&mut self, frame: Frame, is_speech: bool, is_eot: bool) -> Option<Utterance> {
        let ts = frame.timestamp;
        self.push_window(frame.clone());

        if is_speech && !self.in_speech {
            self.in_speech = true;
            self.current.clear();
            self.speech_sample_count = 0;
            self.current_start_ts = Some(ts);
            self.seed_pre_roll();
        }

        if self.in_speech {
            let frame_samples = bytes_to_f32(&frame.payload);
            if is_speech {
                self.speech_sample_count += frame_samples.len();
            }
            self.current.extend(frame_samples);

            if self.current.len() >= self.max_speech_samples {
                self.safety_valve_flushes += 1;
                return self.finalize(ts);
            }
        }

        if is_eot && self.in_speech && self.speech_sample_count >= self.min_speech_samples {
            return self.finalize(ts);
        }

        if is_eot && self.in_speech {
            // Ended but too short to count as an utterance; drop silently.
            self.reset_current();
        }

        None
    }

    fn reset_current(&mut self) {
        self.in_speech = false;
        self.current.clear();
        self.speech_sample_count = 0;
        self.current_start_ts = None;
    }

    fn finalize(&mut self, end_ts: f64) -> Option<Utterance> {
        let start_ts = self.current_start_ts?;
        let speech_samples = self.speech_sample_count;
        let duration_ms = (end_ts - start_ts) * 1000.0;
        let audio_length_ms = self.current.len() as f64 / self.sample_rate as f64 * 1000.0;
        let utterance = Utterance {
            samples: std::mem::take(&mut self.current),
            start_ts,
            end_ts,
            duration_ms,
            audio_length_ms,
            speech_samples,
        };
        self.reset_current();
        self.utterances_emitted += 1;
        Some(utterance)
    }

    pub fn metrics(&self) -> SegmentBufferMetrics {
        SegmentBufferMetrics {
            frames_buffered: self.frame_window.len(),
            utterances_emitted: self.utterances_emitted,
            safety_valve_flushes: self.safety_valve_flushes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ts: f64, samples: &[i16]) -> Frame {
        let mut payload = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            payload.extend_from_slice(&s.to_le_bytes());
        }
        Frame::new(ts, payload).unwrap()
    }

    #[test]
    fn short_speech_below_minimum_is_dropped() {
        let mut buf = SegmentBuffer::new(10, 2, 16_000, 4000, 480_000);
        buf.push(frame(0.0, &[100; 10]), true, false);
        let result = buf.push(frame(0.02, &[0; 10]), false, true);
        assert!(result.is_none());
        assert_eq!(buf.metrics().utterances_emitted, 0);
    }

    #[test]
    fn sufficient_speech_finalizes_on_eot() {
        let mut buf = SegmentBuffer::new(10, 2, 16_000, 5, 480_000);
        buf.push(frame(0.0, &[100; 10]), true, false);
        let result = buf.push(frame(0.02, &[0; 10]), true, true);
        let u = result.unwrap();
        assert_eq!(u.speech_samples, 20);
        assert!((u.duration_ms - 20.0).abs() < 1e-6);
    }

    #[test]
    fn safety_valve_flushes_without_eot() {
        let mut buf = SegmentBuffer::new(10, 0, 16_000, 5, 10);
        buf.push(frame(0.0, &[100; 6]), true, false);
        let result = buf.push(frame(0.01, &[100; 6]), true, false);
        assert!(result.is_some());
        assert_eq!(buf.metrics().safety_valve_flushes, 1);
    }

    #[test]
    fn pre_roll_seeds_from_circular_window() {
        let mut buf = SegmentBuffer::new(10, 1, 16_000, 1, 480_000);
        buf.push(frame(0.0, &[0; 4]), false, false);
        let result = buf.push(frame(0.01, &[100; 4]), true, true);
        let u = result.unwrap();
        // the pre-roll frame was classified as silence, so it pads the
        // audio sample buffer but is not counted as speech
        assert_eq!(u.samples.len(), 8);
        assert_eq!(u.speech_samples, 4);
    }

    #[test]
    fn eot_gate_uses_speech_only_sample_count() {
        // pre-roll + intra-turn silence padding must not count toward the
        // min-speech-samples gate: a short cough followed by trailing
        // silence before EoT should not be finalized.
        let mut buf = SegmentBuffer::new(10, 5, 16_000, 50, 480_000);
        buf.push(frame(0.0, &[20_000; 10]), true, false); // 10 speech samples
        buf.push(frame(0.01, &[0; 10]), false, false); // silence padding
        buf.push(frame(0.02, &[0; 10]), false, false); // more silence padding
        let result = buf.push(frame(0.03, &[0; 10]), false, true);
        assert!(result.is_none());
    }
}
