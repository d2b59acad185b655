//! Fuses the neural and classical detectors with an adaptive onset
//! threshold that tightens as background noise grows.

use std::time::Instant;

use crate::error::Result;
use crate::ingress::Frame;

use super::{SpeechDecision, SpeechDetector};

/// Owns both sub-detectors and applies the fusion rule. This is the
/// detector pipelines are built against; the two halves remain
/// independently testable and independently swappable.
pub struct CompositeDetector {
    neural: Box<dyn SpeechDetector>,
    classical: Box<dyn SpeechDetector>,
    onset_threshold: f32,
    min_snr: f32,
    corroboration_floor: f32,
}

impl CompositeDetector {
    pub fn new(
        neural: Box<dyn SpeechDetector>,
        classical: Box<dyn SpeechDetector>,
        onset_threshold: f32,
        min_snr: f32,
        corroboration_floor: f32,
    ) -> Self {
        Self {
            neural,
            classical,
            onset_threshold,
            min_snr,
            corroboration_floor,
        }
    }

    /// `threshold = min(0.8, onset + min(0.3, 10 * background_noise))`
    pub fn adaptive_threshold(&self, background_noise: f32) -> f32 {
        let noise_factor = (background_noise * 10.0).min(0.3);
        (self.onset_threshold + noise_factor).min(0.8)
    }
}

impl SpeechDetector for CompositeDetector {
    fn detect(&self, frame: &Frame, background_noise: f32) -> Result<SpeechDecision> {
        let started = Instant::now();
        let threshold = self.adaptive_threshold(background_noise);

        // A failing sub-detector contributes non-speech for this frame
        // rather than aborting the fusion decision.
        let neural = self.neural.detect(frame, background_noise).ok();
        let classical = self.classical.detect(frame, background_noise).ok();

        let confidence = neural.as_ref().map(|d| d.confidence).unwrap_or(0.0);
        let classical_vote = classical.as_ref().map(|d| d.is_speech).unwrap_or(false);
        let energy = neural
            .as_ref()
            .or(classical.as_ref())
            .map(|d| d.energy)
            .unwrap_or(0.0);
        let snr = energy / (background_noise + 1e-6);

        let is_speech = (confidence >= threshold
            || (confidence >= self.corroboration_floor && classical_vote))
            && snr >= self.min_snr;

        Ok(SpeechDecision {
            is_speech,
            confidence,
            energy,
            snr,
            adaptive_threshold: threshold,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }
}
