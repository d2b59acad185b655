//! Per-session orchestrator: drains the Ingress Buffer, classifies each
//! frame, drives the turn-state machine and segment buffer, and dispatches
//! finalized utterances to the ASR front-end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::asr::{AsrFrontEnd, Transcription};
use crate::config::PipelineConfig;
use crate::ingress::{IngressBuffer, IngressMetrics};
use crate::segment_buffer::{SegmentBuffer, SegmentBufferMetrics};
use crate::turn_state::TurnStateTracker;
use crate::vad::SpeechDetector;

/// Composed point-in-time snapshot across the ingress and segmentation
/// stages, for a caller polling pipeline health.
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub ingress: IngressMetrics,
    pub segment_buffer: SegmentBufferMetrics,
}

/// Generates a fallback session id for callers that don't track their own,
/// so pipeline log lines are still joinable to one another.
fn default_session_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("session-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug, Default)]
pub struct PipelineDiagnostics {
    pub frames_in: AtomicU64,
    pub vad_speech_frames: AtomicU64,
    pub utterances_emitted: AtomicU64,
    pub transcriptions_emitted: AtomicU64,
    pub transcription_errors: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSnapshot {
    pub frames_in: u64,
    pub vad_speech_frames: u64,
    pub utterances_emitted: u64,
    pub transcriptions_emitted: u64,
    pub transcription_errors: u64,
}

impl PipelineDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            vad_speech_frames: self.vad_speech_frames.load(Ordering::Relaxed),
            utterances_emitted: self.utterances_emitted.load(Ordering::Relaxed),
            transcriptions_emitted: self.transcriptions_emitted.load(Ordering::Relaxed),
            transcription_errors: self.transcription_errors.load(Ordering::Relaxed),
        }
    }
}

/// Ties every component together for the lifetime of one call/session.
pub struct Pipeline {
    session_id: String,
    config: PipelineConfig,
    ingress: IngressBuffer,
    detector: Box<dyn SpeechDetector>,
    turn_state: TurnStateTracker,
    segment_buffer: SegmentBuffer,
    asr: Arc<AsrFrontEnd>,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        ingress: IngressBuffer,
        detector: Box<dyn SpeechDetector>,
        asr: Arc<AsrFrontEnd>,
    ) -> Self {
        Self::with_session_id(config, ingress, detector, asr, default_session_id())
    }

    /// Same as [`Pipeline::new`], but with an explicit `session_id` used to
    /// correlate log lines for this call across components. Callers that
    /// already track a session/call identifier should use this constructor
    /// so pipeline logs can be joined against their own session logs.
    pub fn with_session_id(
        config: PipelineConfig,
        ingress: IngressBuffer,
        detector: Box<dyn SpeechDetector>,
        asr: Arc<AsrFrontEnd>,
        session_id: impl Into<String>,
    ) -> Self {
        let turn_state = TurnStateTracker::new(
            config.energy_history_len,
            config.speaking_rate_history_len,
            config.base_eot_silence_ms,
            config.eot_adaptive_enabled,
        );
        let segment_buffer = SegmentBuffer::new(
            config.frame_window_capacity,
            config.speech_pad_frames(config.vad_frame_ms as u64),
            config.sample_rate,
            config.min_speech_samples(),
            config.max_speech_samples(),
        );
        Self {
            session_id: session_id.into(),
            config,
            ingress,
            detector,
            turn_state,
            segment_buffer,
            asr,
            diagnostics: Arc::new(PipelineDiagnostics::default()),
        }
    }

    pub fn diagnostics(&self) -> Arc<PipelineDiagnostics> {
        Arc::clone(&self.diagnostics)
    }

    pub fn metrics(&self) -> PipelineMetrics {
        PipelineMetrics {
            ingress: self.ingress.metrics(),
            segment_buffer: self.segment_buffer.metrics(),
        }
    }

    /// Runs until the ingress buffer closes and drains. Each finalized
    /// utterance is transcribed and forwarded via `on_transcription`.
    pub async fn run<F>(&mut self, mut on_transcription: F)
    where
        F: FnMut(Transcription),
    {
        let poll_timeout = Duration::from_millis(self.config.ingress_poll_timeout_ms);

        loop {
            let frame = match self.ingress.pop(poll_timeout).await {
                Some(frame) => frame,
                None => {
                    if self.ingress.is_closed() {
                        break;
                    }
                    continue;
                }
            };

            self.diagnostics.frames_in.fetch_add(1, Ordering::Relaxed);

            let background_noise = self.turn_state.background_noise();
            let decision = match self.detector.detect(&frame, background_noise) {
                Ok(d) => d,
                Err(e) => {
                    warn!(
                        error_code = e.error_code(),
                        error = %e,
                        component = "vad",
                        session_id = %self.session_id,
                        "vad detection failed, treating frame as silence"
                    );
                    continue;
                }
            };

            if decision.is_speech {
                self.diagnostics
                    .vad_speech_frames
                    .fetch_add(1, Ordering::Relaxed);
            }

            let (is_eot, event) = self.turn_state.detect_end_of_turn(
                decision.is_speech,
                decision.energy,
                frame.timestamp,
            );
            if is_eot {
                debug!(
                    speech_ms = event.speech_duration_ms,
                    silence_ms = event.silence_duration_ms,
                    "end of turn"
                );
            }

            if let Some(utterance) =
                self.segment_buffer
                    .push(frame, decision.is_speech, is_eot)
            {
                self.diagnostics
                    .utterances_emitted
                    .fetch_add(1, Ordering::Relaxed);
                match self
                    .asr
                    .transcribe(utterance.samples, None, self.config.sample_rate)
                    .await
                {
                    Ok(transcription) => {
                        self.diagnostics
                            .transcriptions_emitted
                            .fetch_add(1, Ordering::Relaxed);
                        info!(
                            text = %transcription.text,
                            confidence = transcription.confidence,
                            "transcription ready"
                        );
                        on_transcription(transcription);
                    }
                    Err(e) => {
                        self.diagnostics
                            .transcription_errors
                            .fetch_add(1, Ordering::Relaxed);
                        warn!(
                            error_code = e.error_code(),
                            error = %e,
                            component = "asr",
                            session_id = %self.session_id,
                            "asr transcription failed, utterance discarded"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asr::{StubTranscriber, Transcriber};
    use crate::ingress::Frame;
    use crate::vad::StubDetector;

    fn frame(ts: f64, level: i16) -> Frame {
        let samples = vec![level; 320];
        let mut payload = Vec::with_capacity(640);
        for s in samples {
            payload.extend_from_slice(&s.to_le_bytes());
        }
        Frame::new(ts, payload).unwrap()
    }

    fn stub_loader() -> impl Fn() -> Result<Box<dyn Transcriber>> + Send + Sync + 'static {
        || Ok(Box::new(StubTranscriber::new()) as Box<dyn Transcriber>)
    }

    async fn stub_asr(sample_rate: u32) -> Arc<AsrFrontEnd> {
        let asr = Arc::new(AsrFrontEnd::new(stub_loader(), 1, 1, sample_rate));
        asr.initialize().await.unwrap();
        asr
    }

    #[tokio::test]
    async fn silence_only_emits_nothing() {
        let config = PipelineConfig::default();
        let ingress = IngressBuffer::new(config.ingress_capacity);
        let detector: Box<dyn SpeechDetector> = Box::new(StubDetector::new(0.5));
        let asr = stub_asr(config.sample_rate).await;

        for i in 0..5 {
            ingress.push(frame(i as f64 * 0.02, 0));
        }
        ingress.close();

        let mut pipeline = Pipeline::new(config, ingress, detector, asr);
        let mut results = Vec::new();
        pipeline.run(|t| results.push(t)).await;

        assert!(results.is_empty());
        assert_eq!(pipeline.diagnostics().snapshot().utterances_emitted, 0);
    }

    #[tokio::test]
    async fn loud_utterance_then_silence_produces_transcription() {
        let mut config = PipelineConfig::default();
        config.min_speech_duration_ms = 20;
        config.base_eot_silence_ms = 40;
        let ingress = IngressBuffer::new(config.ingress_capacity);
        let detector: Box<dyn SpeechDetector> = Box::new(StubDetector::new(0.01));
        let asr = stub_asr(config.sample_rate).await;

        ingress.push(frame(0.00, 20_000));
        ingress.push(frame(0.02, 20_000));
        ingress.push(frame(0.04, 0));
        ingress.push(frame(0.10, 0));
        ingress.close();

        let mut pipeline = Pipeline::new(config, ingress, detector, asr);
        let mut results = Vec::new();
        pipeline.run(|t| results.push(t)).await;

        assert_eq!(results.len(), 1);
        assert_eq!(pipeline.diagnostics().snapshot().utterances_emitted, 1);
    }

    #[tokio::test]
    async fn metrics_compose_ingress_and_segment_buffer_snapshots() {
        let config = PipelineConfig::default();
        let ingress = IngressBuffer::new(config.ingress_capacity);
        let detector: Box<dyn SpeechDetector> = Box::new(StubDetector::new(0.5));
        let asr = stub_asr(config.sample_rate).await;

        ingress.push(frame(0.0, 0));
        ingress.close();

        let pipeline =
            Pipeline::with_session_id(config, ingress, detector, asr, "session-under-test");
        let metrics = pipeline.metrics();
        assert_eq!(metrics.ingress.frames_received, 1);
        assert_eq!(metrics.segment_buffer.utterances_emitted, 0);
    }

    #[tokio::test]
    async fn transcription_failure_is_logged_but_pipeline_keeps_running() {
        struct FailingTranscriber;
        impl Transcriber for FailingTranscriber {
            fn transcribe(&mut self, _samples: &[f32], _language: Option<&str>) -> Result<(String, f32)> {
                Err(crate::error::CoreError::AsrTranscribeFailed("boom".into()))
            }
        }

        let mut config = PipelineConfig::default();
        config.min_speech_duration_ms = 20;
        config.base_eot_silence_ms = 40;
        let ingress = IngressBuffer::new(config.ingress_capacity);
        let detector: Box<dyn SpeechDetector> = Box::new(StubDetector::new(0.01));
        let asr = Arc::new(AsrFrontEnd::new(
            || Ok(Box::new(FailingTranscriber) as Box<dyn Transcriber>),
            1,
            1,
            config.sample_rate,
        ));
        asr.initialize().await.unwrap();

        ingress.push(frame(0.00, 20_000));
        ingress.push(frame(0.02, 0));
        ingress.push(frame(0.10, 0));
        ingress.close();

        let mut pipeline = Pipeline::new(config, ingress, detector, asr);
        let mut results = Vec::new();
        pipeline.run(|t| results.push(t)).await;

        assert!(results.is_empty());
        assert_eq!(pipeline.diagnostics().snapshot().transcription_errors, 1);
    }
}
