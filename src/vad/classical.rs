//! WebRTC-style classical VAD on exact 10/20/30 ms frames.

use std::time::Instant;

use crate::error::{CoreError, Result};
use crate::ingress::Frame;

use super::{bytes_to_f32, rms, SpeechDecision, SpeechDetector};

#[cfg(feature = "classical-vad")]
pub struct ClassicalDetector {
    vad: parking_lot::Mutex<webrtc_vad::Vad>,
    sample_rate: u32,
    frame_ms: u32,
}

#[cfg(feature = "classical-vad")]
impl ClassicalDetector {
    pub fn new(sample_rate: u32, frame_ms: u32, aggressiveness: u8) -> Result<Self> {
        let mode = match aggressiveness {
            0 => webrtc_vad::VadMode::Quality,
            1 => webrtc_vad::VadMode::LowBitrate,
            2 => webrtc_vad::VadMode::Aggressive,
            _ => webrtc_vad::VadMode::VeryAggressive,
        };
        let vad = webrtc_vad::Vad::new_with_rate_and_mode(
            sample_rate_enum(sample_rate)?,
            mode,
        );
        Ok(Self {
            vad: parking_lot::Mutex::new(vad),
            sample_rate,
            frame_ms,
        })
    }

    fn expected_len(&self) -> usize {
        (self.sample_rate as u64 * self.frame_ms as u64 / 1000) as usize
    }

    fn to_pcm16(samples: &[f32], expected_len: usize) -> Vec<i16> {
        let mut out: Vec<i16> = samples
            .iter()
            .map(|s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect();
        out.resize(expected_len, 0);
        out
    }
}

#[cfg(feature = "classical-vad")]
fn sample_rate_enum(sample_rate: u32) -> Result<webrtc_vad::SampleRate> {
    match sample_rate {
        8_000 => Ok(webrtc_vad::SampleRate::Rate8kHz),
        16_000 => Ok(webrtc_vad::SampleRate::Rate16kHz),
        32_000 => Ok(webrtc_vad::SampleRate::Rate32kHz),
        48_000 => Ok(webrtc_vad::SampleRate::Rate48kHz),
        other => Err(CoreError::VadInitFailed(format!(
            "unsupported classical-vad sample rate: {other}"
        ))),
    }
}

#[cfg(feature = "classical-vad")]
impl SpeechDetector for ClassicalDetector {
    fn detect(&self, frame: &Frame, background_noise: f32) -> Result<SpeechDecision> {
        let started = Instant::now();
        let samples = bytes_to_f32(&frame.payload);
        let pcm = Self::to_pcm16(&samples, self.expected_len());
        let is_speech = self
            .vad
            .lock()
            .is_voice_segment(&pcm)
            .map_err(|_| CoreError::VadInferenceError {
                detector: "classical",
                message: "webrtc-vad rejected frame length".into(),
            })?;
        let energy = rms(&samples);
        let snr = energy / (background_noise + 1e-6);
        Ok(SpeechDecision {
            is_speech,
            confidence: if is_speech { 1.0 } else { 0.0 },
            energy,
            snr,
            adaptive_threshold: 0.5,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }
}

#[cfg(not(feature = "classical-vad"))]
pub struct ClassicalDetector;

#[cfg(not(feature = "classical-vad"))]
impl ClassicalDetector {
    pub fn new(_sample_rate: u32, _frame_ms: u32, _aggressiveness: u8) -> Result<Self> {
        Err(CoreError::VadInitFailed(
            "classical-vad feature disabled".into(),
        ))
    }
}

#[cfg(not(feature = "classical-vad"))]
impl SpeechDetector for ClassicalDetector {
    fn detect(&self, _frame: &Frame, _background_noise: f32) -> Result<SpeechDecision> {
        Err(CoreError::VadInferenceError {
            detector: "classical",
            message: "classical-vad feature disabled".into(),
        })
    }
}
