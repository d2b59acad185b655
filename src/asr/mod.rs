//! ASR Front-End: one shared transcriber instance guarded by a worker pool
//! and a concurrency semaphore.

mod stub;
#[cfg(feature = "whisper")]
mod whisper_onnx;

pub use stub::StubTranscriber;
#[cfg(feature = "whisper")]
pub use whisper_onnx::WhisperAsr;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::{oneshot, Semaphore};

use crate::error::{CoreError, Result};
use crate::init::SharedInit;

/// Result of transcribing one finalized utterance.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcription {
    pub text: String,
    pub confidence: f32,
    pub language: Option<String>,
    pub latency_ms: f64,
    pub audio_duration_ms: f64,
}

impl Transcription {
    /// Serializes to the camelCase JSON shape callers forward to a
    /// transport or log sink.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Narrow capability trait a transcriber backend implements.
pub trait Transcriber: Send {
    fn transcribe(&mut self, samples: &[f32], language: Option<&str>) -> Result<(String, f32)>;
}

struct Job {
    samples: Vec<f32>,
    language: Option<String>,
    sample_rate: u32,
    respond_to: oneshot::Sender<Result<Transcription>>,
}

type SharedTranscriber = Mutex<Box<dyn Transcriber>>;

/// Owns one shared `Transcriber`, a fixed worker-thread pool draining a
/// bounded channel, and a semaphore gating how many jobs may be in flight.
///
/// The model itself is loaded lazily: the first call to [`AsrFrontEnd::initialize`]
/// runs `loader` and a one-second silent warmup inference, then publishes
/// the instance for every worker thread and every later `initialize` caller
/// to share. `transcribe` fails with `CoreError::NotInitialized` until that
/// has completed.
pub struct AsrFrontEnd {
    sender: Sender<Job>,
    semaphore: Arc<Semaphore>,
    model: Arc<SharedInit<SharedTranscriber>>,
    loader: Arc<dyn Fn() -> Result<Box<dyn Transcriber>> + Send + Sync>,
    sample_rate: u32,
    _workers: Vec<JoinHandle<()>>,
}

impl AsrFrontEnd {
    /// `loader` constructs a fresh `Transcriber` and is called at most once,
    /// by whichever caller first awaits `initialize`.
    pub fn new(
        loader: impl Fn() -> Result<Box<dyn Transcriber>> + Send + Sync + 'static,
        num_workers: usize,
        max_concurrent_jobs: usize,
        sample_rate: u32,
    ) -> Self {
        let (tx, rx): (Sender<Job>, Receiver<Job>) = crossbeam_channel::unbounded();
        let model: Arc<SharedInit<SharedTranscriber>> = Arc::new(SharedInit::new());
        let mut workers = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            let rx = rx.clone();
            let model = Arc::clone(&model);
            workers.push(std::thread::spawn(move || {
                while let Ok(job) = rx.recv() {
                    let started = std::time::Instant::now();
                    let result = match model.get() {
                        None => Err(CoreError::NotInitialized("asr model")),
                        Some(model) => run_job(&model, &job),
                    };
                    let response = result.map(|(text, confidence)| Transcription {
                        text,
                        confidence,
                        language: job.language.clone(),
                        latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                        audio_duration_ms: job.samples.len() as f64 / sample_rate as f64 * 1000.0,
                    });
                    let _ = job.respond_to.send(response);
                }
            }));
        }

        Self {
            sender: tx,
            semaphore: Arc::new(Semaphore::new(max_concurrent_jobs)),
            model,
            loader: Arc::new(loader),
            sample_rate,
            _workers: workers,
        }
    }

    /// Idempotent: the loader and warmup run at most once for the lifetime
    /// of this front-end, no matter how many callers await this.
    pub async fn initialize(&self) -> Result<()> {
        let loader = Arc::clone(&self.loader);
        let sample_rate = self.sample_rate;
        self.model
            .get_or_try_init(move || async move {
                let mut transcriber = loader()?;
                let warmup_silence = vec![0.0f32; sample_rate as usize];
                transcriber.transcribe(&warmup_silence, None)?;
                Ok(Mutex::new(transcriber))
            })
            .await?;
        Ok(())
    }

    pub async fn transcribe(
        &self,
        samples: Vec<f32>,
        language: Option<String>,
        sample_rate: u32,
    ) -> Result<Transcription> {
        if self.model.get().is_none() {
            return Err(CoreError::NotInitialized("asr model"));
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| CoreError::AsrTranscribeFailed(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        let job = Job {
            samples,
            language,
            sample_rate,
            respond_to: tx,
        };
        self.sender
            .send(job)
            .map_err(|e| CoreError::AsrTranscribeFailed(e.to_string()))?;

        rx.await
            .map_err(|e| CoreError::AsrTranscribeFailed(e.to_string()))?
    }
}

/// Runs one job against the shared model behind a panic boundary: a single
/// malformed input (e.g. a NaN logit deep in a decode loop) fails only this
/// transcription, not the worker thread it runs on.
fn run_job(model: &SharedTranscriber, job: &Job) -> Result<(String, f32)> {
    if job.samples.is_empty() {
        return Ok((String::new(), 0.0));
    }
    let normalized = normalize(&job.samples);
    let language = job.language.as_deref();
    catch_unwind(AssertUnwindSafe(|| model.lock().transcribe(&normalized, language)))
        .unwrap_or_else(|_| {
            Err(CoreError::AsrTranscribeFailed(
                "transcriber panicked during decode".into(),
            ))
        })
}

/// `audio /= max(|audio|)` when `max(|audio|) > 1.0`, matching the
/// normalization Whisper-family models expect.
fn normalize(samples: &[f32]) -> Vec<f32> {
    let max_val = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if max_val > 1.0 {
        samples.iter().map(|s| s / max_val).collect()
    } else {
        samples.to_vec()
    }
}

/// `1 / (1 + exp(-avg_logprob))`, clamped to `[0, 1]`.
pub fn compute_confidence(avg_logprobs: &[f32]) -> f32 {
    if avg_logprobs.is_empty() {
        return 0.0;
    }
    let avg = avg_logprobs.iter().sum::<f32>() / avg_logprobs.len() as f32;
    let confidence = 1.0 / (1.0 + (-avg).exp());
    confidence.clamp(0.0, 1.0)
}
