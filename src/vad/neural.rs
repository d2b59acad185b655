//! Silero-style neural VAD, evaluated statelessly: no recurrent state is
//! threaded between calls, so concurrent sessions sharing one model
//! instance cannot leak state into each other.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{CoreError, Result};
use crate::ingress::Frame;
use crate::init::SharedInit;

use super::{bytes_to_f32, rms, SpeechDecision, SpeechDetector};

const WINDOW: usize = 512;

#[cfg(feature = "neural-vad")]
struct Session(ort::session::Session);

/// Wraps an ONNX Runtime session running a Silero-style speech-probability
/// model. Each `detect` call zero-pads its input up to `WINDOW` samples and
/// runs one independent inference; no hidden state survives between calls.
pub struct NeuralDetector {
    #[cfg(feature = "neural-vad")]
    session: parking_lot::Mutex<Session>,
    sample_rate: i64,
}

impl NeuralDetector {
    #[cfg(feature = "neural-vad")]
    pub fn load(model_path: &std::path::Path, sample_rate: u32) -> Result<Self> {
        let session = ort::session::Session::builder()
            .map_err(|e| CoreError::VadInitFailed(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| CoreError::VadInitFailed(e.to_string()))?;
        Ok(Self {
            session: parking_lot::Mutex::new(Session(session)),
            sample_rate: sample_rate as i64,
        })
    }

    #[cfg(not(feature = "neural-vad"))]
    pub fn load(_model_path: &std::path::Path, _sample_rate: u32) -> Result<Self> {
        Err(CoreError::VadInitFailed(
            "neural-vad feature disabled".into(),
        ))
    }

    fn pad_to_window(samples: &[f32]) -> [f32; WINDOW] {
        let mut buf = [0.0f32; WINDOW];
        let n = samples.len().min(WINDOW);
        buf[..n].copy_from_slice(&samples[..n]);
        buf
    }

    #[cfg(feature = "neural-vad")]
    fn run_window(&self, window: &[f32; WINDOW]) -> Result<f32> {
        use ndarray::Array2;
        use ort::value::Value;

        let input =
            Array2::from_shape_vec((1, WINDOW), window.to_vec()).map_err(|e| {
                CoreError::VadInferenceError {
                    detector: "neural",
                    message: e.to_string(),
                }
            })?;
        let input_value = Value::from_array(input).map_err(|e| CoreError::VadInferenceError {
            detector: "neural",
            message: e.to_string(),
        })?;
        let sr_value = Value::from_array(ndarray::arr1(&[self.sample_rate]))
            .map_err(|e| CoreError::VadInferenceError {
                detector: "neural",
                message: e.to_string(),
            })?;

        let mut session = self.session.lock();
        let outputs = session
            .0
            .run(ort::inputs![
                "input" => input_value,
                "sr" => sr_value,
            ])
            .map_err(|e| CoreError::VadInferenceError {
                detector: "neural",
                message: e.to_string(),
            })?;

        let (_, data) = outputs[0]
            .try_extract_raw_tensor::<f32>()
            .map_err(|e| CoreError::VadInferenceError {
                detector: "neural",
                message: e.to_string(),
            })?;
        Ok(data.first().copied().unwrap_or(0.0))
    }

    #[cfg(not(feature = "neural-vad"))]
    fn run_window(&self, _window: &[f32; WINDOW]) -> Result<f32> {
        Err(CoreError::VadInferenceError {
            detector: "neural",
            message: "neural-vad feature disabled".into(),
        })
    }
}

impl SpeechDetector for NeuralDetector {
    fn detect(&self, frame: &Frame, background_noise: f32) -> Result<SpeechDecision> {
        let started = Instant::now();
        let samples = bytes_to_f32(&frame.payload);
        let window = Self::pad_to_window(&samples);
        let probability = self.run_window(&window)?;
        let energy = rms(&samples);
        let snr = energy / (background_noise + 1e-6);
        Ok(SpeechDecision {
            is_speech: probability >= 0.5,
            confidence: probability,
            energy,
            snr,
            adaptive_threshold: 0.5,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }
}

/// Process-wide handle around a [`NeuralDetector`]: the first call to
/// [`LazyNeuralDetector::initialize`] loads the model and runs a one-second
/// silent warmup inference, then publishes the instance for every clone of
/// this handle to share. `detect` fails with `CoreError::NotInitialized`
/// until that has completed.
#[derive(Clone)]
pub struct LazyNeuralDetector {
    init: Arc<SharedInit<NeuralDetector>>,
    model_path: PathBuf,
    sample_rate: u32,
}

impl LazyNeuralDetector {
    pub fn new(model_path: PathBuf, sample_rate: u32) -> Self {
        Self {
            init: Arc::new(SharedInit::new()),
            model_path,
            sample_rate,
        }
    }

    /// Idempotent: the loader and warmup run at most once across every
    /// clone of this handle.
    pub async fn initialize(&self) -> Result<()> {
        let model_path = self.model_path.clone();
        let sample_rate = self.sample_rate;
        self.init
            .get_or_try_init(move || async move {
                let detector = NeuralDetector::load(&model_path, sample_rate)?;
                let silent_pcm = vec![0u8; sample_rate as usize * 2]; // 1s of i16 silence
                let warmup_frame = Frame::new(0.0, silent_pcm)?;
                detector.detect(&warmup_frame, 0.01)?;
                Ok(detector)
            })
            .await?;
        Ok(())
    }
}

impl SpeechDetector for LazyNeuralDetector {
    fn detect(&self, frame: &Frame, background_noise: f32) -> Result<SpeechDecision> {
        let detector = self
            .init
            .get()
            .ok_or(CoreError::NotInitialized("neural vad"))?;
        detector.detect(frame, background_noise)
    }
}
