//! Deterministic energy-threshold detector, used in tests and whenever
//! model weights are unavailable.

use std::time::Instant;

use crate::error::Result;
use crate::ingress::Frame;

use super::{bytes_to_f32, rms, SpeechDecision, SpeechDetector};

pub struct StubDetector {
    threshold: f32,
}

impl StubDetector {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl SpeechDetector for StubDetector {
    fn detect(&self, frame: &Frame, background_noise: f32) -> Result<SpeechDecision> {
        let started = Instant::now();
        let samples = bytes_to_f32(&frame.payload);
        let energy = rms(&samples);
        let snr = energy / (background_noise + 1e-6);
        Ok(SpeechDecision {
            is_speech: energy >= self.threshold,
            confidence: (energy / self.threshold.max(1e-6)).min(1.0),
            energy,
            snr,
            adaptive_threshold: self.threshold,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of(samples: &[i16]) -> Frame {
        let mut payload = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            payload.extend_from_slice(&s.to_le_bytes());
        }
        Frame::new(0.0, payload).unwrap()
    }

    #[test]
    fn silence_is_not_speech() {
        let vad = StubDetector::new(0.05);
        let d = vad.detect(&frame_of(&[0; 320]), 0.01).unwrap();
        assert!(!d.is_speech);
    }

    #[test]
    fn loud_tone_is_speech() {
        let vad = StubDetector::new(0.05);
        let samples: Vec<i16> = (0..320).map(|_| 20_000).collect();
        let d = vad.detect(&frame_of(&samples), 0.01).unwrap();
        assert!(d.is_speech);
    }
}
