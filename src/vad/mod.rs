//! VAD Engine: dual-detector voice activity detection with fusion and an
//! adaptive onset threshold.

mod classical;
mod composite;
mod neural;
mod stub;

pub use classical::ClassicalDetector;
pub use composite::CompositeDetector;
pub use neural::{LazyNeuralDetector, NeuralDetector};
pub use stub::StubDetector;

use crate::error::Result;
use crate::ingress::Frame;

/// Outcome of a single speech/silence classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechDecision {
    pub is_speech: bool,
    pub confidence: f32,
    pub energy: f32,
    pub snr: f32,
    pub adaptive_threshold: f32,
    pub latency_ms: f64,
}

/// Narrow capability trait a detector implements. Replaces a duck-typed
/// model object with an explicit, independently testable interface.
pub trait SpeechDetector: Send + Sync {
    /// Classify one frame given the current background-noise estimate.
    fn detect(&self, frame: &Frame, background_noise: f32) -> Result<SpeechDecision>;
}

pub(crate) fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

pub(crate) fn bytes_to_f32(payload: &[u8]) -> Vec<f32> {
    payload
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
        .collect()
}
