//! Whisper ONNX backend via the `ort` crate, normative path only.
//!
//! Targets the HuggingFace `optimum` separate encoder + decoder export:
//! - `encoder_model.onnx` — input `[1,80,3000]` → `last_hidden_state [1,1500,384]`
//! - `decoder_model.onnx` — `input_ids [1,seq]` + `encoder_hidden_states [1,1500,384]`
//!   → `logits [1,seq,vocab]`
//! - `tokenizer.json`     — HuggingFace fast tokenizer
//!
//! ## Mel spectrogram parameters (must match training)
//!
//! | Parameter       | Value          |
//! |-----------------|----------------|
//! | Hann window     | 400 samples    |
//! | FFT size        | 400            |
//! | Frequency bins  | 201 (400/2+1)  |
//! | Hop length      | 160 (10 ms)    |
//! | Mel bands       | 80             |
//! | Mel range       | 0-8 000 Hz     |
//! | Frames          | 3 000 (30 s)   |
//!
//! Beam-search decode (width `beam_size`, `best_of` completed candidates
//! considered at the end), stopping at EOT `50257` or `MAX_TOKENS` tokens.
//! No cloud fallback, phrase-bias terms, or post-utterance refinement: those
//! were draft-only env-toggled surfaces in the crate this was ported from.

use std::path::PathBuf;

use ndarray::Array3;
use ort::session::Session;
use rustfft::{num_complex::Complex, FftPlanner};
use tokenizers::Tokenizer;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::{CoreError, Result};

use super::{compute_confidence, Transcriber};

const N_FFT: usize = 400;
const N_FREQS: usize = N_FFT / 2 + 1;
const HOP: usize = 160;
const N_MELS: usize = 80;
const N_FRAMES: usize = 3_000;
const MEL_SAMPLES: usize = 480_000;

const EOT: i64 = 50257;
const SOT: i64 = 50258;
const ENGLISH: i64 = 50259;
const TRANSCRIBE: i64 = 50359;
const NO_TIMESTAMPS: i64 = 50363;
const MAX_TOKENS: usize = 224;
const PROMPT_LEN: usize = 4; // SOT, ENGLISH, TRANSCRIBE, NO_TIMESTAMPS

pub struct WhisperModelConfig {
    pub encoder_path: PathBuf,
    pub decoder_path: PathBuf,
    pub tokenizer_path: PathBuf,
    /// Number of candidate sequences kept at each decode step.
    pub beam_size: usize,
    /// Number of completed candidates considered when picking the final
    /// transcript (by mean log-probability).
    pub best_of: usize,
}

impl WhisperModelConfig {
    /// Builds a model config from a pipeline config's `asr_beam_size`/`asr_best_of`.
    pub fn from_pipeline_config(
        encoder_path: PathBuf,
        decoder_path: PathBuf,
        tokenizer_path: PathBuf,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            encoder_path,
            decoder_path,
            tokenizer_path,
            beam_size: config.asr_beam_size,
            best_of: config.asr_best_of,
        }
    }
}

pub struct WhisperAsr {
    encoder: Session,
    decoder: Session,
    tokenizer: Tokenizer,
    mel_filters: Vec<Vec<f32>>,
    beam_size: usize,
    best_of: usize,
}

/// One in-progress or completed beam-search candidate.
struct Candidate {
    tokens: Vec<i64>,
    logprobs: Vec<f32>,
    cumulative_logprob: f32,
    finished: bool,
}

impl Candidate {
    fn mean_logprob(&self) -> f32 {
        if self.logprobs.is_empty() {
            0.0
        } else {
            self.cumulative_logprob / self.logprobs.len() as f32
        }
    }
}

impl WhisperAsr {
    pub fn load(config: &WhisperModelConfig) -> Result<Self> {
        let encoder = Session::builder()
            .map_err(|e| CoreError::AsrInitFailed(e.to_string()))?
            .commit_from_file(&config.encoder_path)
            .map_err(|e| CoreError::AsrInitFailed(e.to_string()))?;
        let decoder = Session::builder()
            .map_err(|e| CoreError::AsrInitFailed(e.to_string()))?
            .commit_from_file(&config.decoder_path)
            .map_err(|e| CoreError::AsrInitFailed(e.to_string()))?;
        let tokenizer = Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| CoreError::AsrInitFailed(e.to_string()))?;
        let mel_filters = mel_filter_bank(N_FREQS, N_MELS, 16_000);
        Ok(Self {
            encoder,
            decoder,
            tokenizer,
            mel_filters,
            beam_size: config.beam_size.max(1),
            best_of: config.best_of.max(1),
        })
    }

    fn log_mel_spectrogram(&self, samples: &[f32]) -> Array3<f32> {
        let mut padded = samples.to_vec();
        padded.resize(MEL_SAMPLES, 0.0);

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(N_FFT);
        let window = hann_window(N_FFT);

        let mut mel = vec![vec![0.0f32; N_FRAMES]; N_MELS];
        for frame_idx in 0..N_FRAMES {
            let start = frame_idx * HOP;
            if start + N_FFT > padded.len() {
                break;
            }
            let mut buf: Vec<Complex<f32>> = (0..N_FFT)
                .map(|i| Complex::new(padded[start + i] * window[i], 0.0))
                .collect();
            fft.process(&mut buf);

            let power: Vec<f32> = buf[..N_FREQS].iter().map(|c| c.norm_sqr()).collect();
            for (mel_idx, filter) in self.mel_filters.iter().enumerate() {
                let energy: f32 = filter.iter().zip(power.iter()).map(|(f, p)| f * p).sum();
                mel[mel_idx][frame_idx] = (energy.max(1e-10)).log10();
            }
        }

        let flat: Vec<f32> = mel.into_iter().flatten().collect();
        Array3::from_shape_vec((1, N_MELS, N_FRAMES), flat).expect("mel tensor shape mismatch")
    }

    /// One decoder forward pass for `tokens`, returning log-probabilities
    /// over the vocabulary for the next token.
    fn next_token_logprobs(
        &mut self,
        tokens: &[i64],
        encoder_hidden: &ort::value::Value,
    ) -> Result<Vec<f32>> {
        let input_ids = ndarray::Array2::from_shape_vec((1, tokens.len()), tokens.to_vec())
            .map_err(|e| CoreError::AsrTranscribeFailed(e.to_string()))?;
        let input_ids_value = ort::value::Value::from_array(input_ids)
            .map_err(|e| CoreError::AsrTranscribeFailed(e.to_string()))?;

        let outputs = self
            .decoder
            .run(ort::inputs![
                "input_ids" => input_ids_value,
                "encoder_hidden_states" => encoder_hidden,
            ])
            .map_err(|e| CoreError::AsrTranscribeFailed(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_raw_tensor::<f32>()
            .map_err(|e| CoreError::AsrTranscribeFailed(e.to_string()))?;
        let vocab = *shape
            .last()
            .ok_or_else(|| CoreError::AsrTranscribeFailed("decoder returned empty shape".into()))?
            as usize;
        if data.len() < vocab {
            return Err(CoreError::AsrTranscribeFailed(
                "decoder output shorter than vocab size".into(),
            ));
        }
        let last_step = &data[data.len() - vocab..];
        Ok(log_softmax(last_step))
    }

    /// Beam-search decode. Returns the chosen token sequence (including the
    /// prompt prefix) alongside the per-token log-probabilities for the
    /// tokens generated after the prompt.
    fn beam_decode(&mut self, encoder_hidden: &ort::value::Value) -> Result<(Vec<i64>, Vec<f32>)> {
        let mut beams = vec![Candidate {
            tokens: vec![SOT, ENGLISH, TRANSCRIBE, NO_TIMESTAMPS],
            logprobs: Vec::new(),
            cumulative_logprob: 0.0,
            finished: false,
        }];

        for _ in 0..MAX_TOKENS {
            if beams.iter().all(|b| b.finished) {
                break;
            }

            let mut expanded: Vec<Candidate> = Vec::new();
            for beam in beams.drain(..) {
                if beam.finished {
                    expanded.push(beam);
                    continue;
                }
                let logprobs = self.next_token_logprobs(&beam.tokens, encoder_hidden)?;
                let top = top_k_indices(&logprobs, self.beam_size);
                for idx in top {
                    let next = idx as i64;
                    let mut tokens = beam.tokens.clone();
                    tokens.push(next);
                    let mut token_logprobs = beam.logprobs.clone();
                    token_logprobs.push(logprobs[idx]);
                    expanded.push(Candidate {
                        tokens,
                        cumulative_logprob: beam.cumulative_logprob + logprobs[idx],
                        finished: next == EOT,
                        logprobs: token_logprobs,
                    });
                }
            }

            expanded.sort_by(|a, b| b.mean_logprob().partial_cmp(&a.mean_logprob()).unwrap_or(std::cmp::Ordering::Equal));
            expanded.truncate(self.beam_size);
            beams = expanded;
        }

        let considered = self.best_of.min(beams.len()).max(1);
        let best = beams[..considered]
            .iter()
            .max_by(|a, b| a.mean_logprob().partial_cmp(&b.mean_logprob()).unwrap_or(std::cmp::Ordering::Equal))
            .expect("beam search always keeps at least one candidate");

        Ok((best.tokens.clone(), best.logprobs.clone()))
    }
}

impl Transcriber for WhisperAsr {
    fn transcribe(&mut self, samples: &[f32], _language: Option<&str>) -> Result<(String, f32)> {
        debug!(samples = samples.len(), "whisper transcribe");
        let mel = self.log_mel_spectrogram(samples);
        let mel_value = ort::value::Value::from_array(mel)
            .map_err(|e| CoreError::AsrTranscribeFailed(e.to_string()))?;

        let encoder_outputs = self
            .encoder
            .run(ort::inputs!["input_features" => mel_value])
            .map_err(|e| CoreError::AsrTranscribeFailed(e.to_string()))?;
        let encoder_hidden = &encoder_outputs[0];

        let (tokens, logprobs) = self.beam_decode(encoder_hidden)?;
        let content_tokens: Vec<u32> = tokens
            .into_iter()
            .skip(PROMPT_LEN)
            .filter(|t| *t != EOT)
            .map(|t| t as u32)
            .collect();

        let text = self
            .tokenizer
            .decode(&content_tokens, true)
            .map_err(|e| CoreError::AsrTranscribeFailed(e.to_string()))?;

        let confidence = compute_confidence(&logprobs);
        Ok((text.trim().to_string(), confidence))
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos())
        .collect()
}

/// Numerically stable `log(softmax(x))`.
fn log_softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let sum_exp: f32 = values.iter().map(|v| (v - max).exp()).sum();
    let log_sum_exp = sum_exp.ln() + max;
    values.iter().map(|v| v - log_sum_exp).collect()
}

/// Indices of the `k` largest values, NaN-safe (NaNs sort last).
fn top_k_indices(values: &[f32], k: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    indices.sort_by(|&a, &b| {
        values[b]
            .partial_cmp(&values[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    indices.truncate(k.max(1));
    indices
}

/// Triangular mel filter bank over `n_freqs` FFT bins, `n_mels` bands,
/// 0-8000 Hz (Whisper's training range regardless of source sample rate).
fn mel_filter_bank(n_freqs: usize, n_mels: usize, sample_rate: u32) -> Vec<Vec<f32>> {
    let mel = |hz: f32| 2595.0 * (1.0 + hz / 700.0).log10();
    let inv_mel = |m: f32| 700.0 * (10f32.powf(m / 2595.0) - 1.0);

    let mel_max = mel(8_000.0_f32.min(sample_rate as f32 / 2.0));
    let mel_min = mel(0.0);
    let points: Vec<f32> = (0..n_mels + 2)
        .map(|i| inv_mel(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();
    let bin = |hz: f32| (hz * (n_freqs as f32 - 1.0) * 2.0 / sample_rate as f32).floor() as usize;

    (0..n_mels)
        .map(|m| {
            let mut filter = vec![0.0f32; n_freqs];
            let (left, center, right) = (bin(points[m]), bin(points[m + 1]), bin(points[m + 2]));
            for f in left..center.min(n_freqs) {
                if center > left {
                    filter[f] = (f - left) as f32 / (center - left) as f32;
                }
            }
            for f in center..right.min(n_freqs) {
                if right > center {
                    filter[f] = (right - f) as f32 / (right - center) as f32;
                }
            }
            filter
        })
        .collect()
}
