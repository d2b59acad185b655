//! End-to-end scenarios driving `Pipeline` through `IngressBuffer` with a
//! stub detector and stub transcriber, mirroring the concrete scenarios the
//! pipeline is expected to handle.

use std::sync::Arc;

use turnstream_core::asr::{AsrFrontEnd, StubTranscriber, Transcriber, Transcription};
use turnstream_core::config::PipelineConfig;
use turnstream_core::ingress::{Frame, IngressBuffer};
use turnstream_core::pipeline::Pipeline;
use turnstream_core::vad::{SpeechDecision, SpeechDetector, StubDetector};

fn pcm_frame(ts: f64, level: i16, n: usize) -> Frame {
    let mut payload = Vec::with_capacity(n * 2);
    for _ in 0..n {
        payload.extend_from_slice(&level.to_le_bytes());
    }
    Frame::new(ts, payload).unwrap()
}

async fn new_asr(config: &PipelineConfig) -> Arc<AsrFrontEnd> {
    let asr = Arc::new(AsrFrontEnd::new(
        || Ok(Box::new(StubTranscriber::new()) as Box<dyn Transcriber>),
        1,
        2,
        config.sample_rate,
    ));
    asr.initialize().await.unwrap();
    asr
}

async fn run_scenario(
    config: PipelineConfig,
    detector: Box<dyn SpeechDetector>,
    frames: Vec<Frame>,
) -> Vec<Transcription> {
    let ingress = IngressBuffer::new(config.ingress_capacity);
    for f in frames {
        ingress.push(f);
    }
    ingress.close();

    let asr = new_asr(&config).await;
    let mut pipeline = Pipeline::new(config, ingress, detector, asr);
    let mut results = Vec::new();
    pipeline.run(|t| results.push(t)).await;
    results
}

#[tokio::test]
async fn silence_only_produces_no_utterance() {
    let config = PipelineConfig::default();
    let frames = (0..10).map(|i| pcm_frame(i as f64 * 0.02, 0, 320)).collect();
    let results = run_scenario(config, Box::new(StubDetector::new(0.05)), frames).await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn short_cough_below_minimum_duration_is_dropped() {
    let mut config = PipelineConfig::default();
    config.min_speech_duration_ms = 200;
    config.base_eot_silence_ms = 40;

    let frames = vec![
        pcm_frame(0.00, 20_000, 320), // one 20ms "cough" frame
        pcm_frame(0.02, 0, 320),
        pcm_frame(0.10, 0, 320), // 80ms later, past the eot threshold
    ];
    let results = run_scenario(config, Box::new(StubDetector::new(0.01)), frames).await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn single_word_utterance_is_transcribed() {
    let mut config = PipelineConfig::default();
    config.min_speech_duration_ms = 20;
    config.base_eot_silence_ms = 40;

    let frames = vec![
        pcm_frame(0.00, 20_000, 320),
        pcm_frame(0.02, 20_000, 320),
        pcm_frame(0.04, 20_000, 320),
        pcm_frame(0.06, 0, 320),
        pcm_frame(0.12, 0, 320),
    ];
    let results = run_scenario(config, Box::new(StubDetector::new(0.01)), frames).await;
    assert_eq!(results.len(), 1);
    assert!(!results[0].text.is_empty());
}

#[tokio::test]
async fn two_turns_produce_two_utterances() {
    let mut config = PipelineConfig::default();
    config.min_speech_duration_ms = 20;
    config.base_eot_silence_ms = 40;

    let frames = vec![
        // turn 1
        pcm_frame(0.00, 20_000, 320),
        pcm_frame(0.02, 20_000, 320),
        pcm_frame(0.04, 0, 320),
        pcm_frame(0.10, 0, 320),
        // gap
        pcm_frame(0.30, 0, 320),
        // turn 2
        pcm_frame(0.40, 20_000, 320),
        pcm_frame(0.42, 20_000, 320),
        pcm_frame(0.44, 0, 320),
        pcm_frame(0.50, 0, 320),
    ];
    let results = run_scenario(config, Box::new(StubDetector::new(0.01)), frames).await;
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn ingress_overflow_drops_oldest_but_pipeline_keeps_running() {
    let mut config = PipelineConfig::default();
    config.ingress_capacity = 3;
    config.min_speech_duration_ms = 20;
    config.base_eot_silence_ms = 40;

    let ingress = IngressBuffer::new(config.ingress_capacity);
    // push more frames than capacity before the pipeline starts draining
    for i in 0..6 {
        ingress.push(pcm_frame(i as f64 * 0.02, 0, 320));
    }
    assert!(ingress.metrics().frames_dropped > 0);
    ingress.push(pcm_frame(0.12, 20_000, 320));
    ingress.push(pcm_frame(0.14, 0, 320));
    ingress.push(pcm_frame(0.20, 0, 320));
    ingress.close();

    let asr = new_asr(&config).await;
    let detector: Box<dyn SpeechDetector> = Box::new(StubDetector::new(0.01));
    let mut pipeline = Pipeline::new(config, ingress, detector, asr);
    let mut results = Vec::new();
    pipeline.run(|t| results.push(t)).await;
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn safety_valve_flushes_long_utterance_without_explicit_eot() {
    let mut config = PipelineConfig::default();
    config.max_speech_duration_ms = 40; // 640 samples at 16kHz
    config.min_speech_duration_ms = 20;
    config.base_eot_silence_ms = 10_000; // never reached within this test

    let frames: Vec<Frame> = (0..10)
        .map(|i| pcm_frame(i as f64 * 0.02, 20_000, 320))
        .collect();
    let results = run_scenario(config, Box::new(StubDetector::new(0.01)), frames).await;
    assert!(!results.is_empty());
}

struct AlwaysSpeech;
impl SpeechDetector for AlwaysSpeech {
    fn detect(
        &self,
        _frame: &Frame,
        _background_noise: f32,
    ) -> turnstream_core::Result<SpeechDecision> {
        Ok(SpeechDecision {
            is_speech: true,
            confidence: 1.0,
            energy: 1.0,
            snr: 10.0,
            adaptive_threshold: 0.5,
            latency_ms: 0.0,
        })
    }
}

#[tokio::test]
async fn first_transcript_latency_is_bounded() {
    let mut config = PipelineConfig::default();
    config.min_speech_duration_ms = 20;
    config.max_speech_duration_ms = 40;

    let frames: Vec<Frame> = (0..4)
        .map(|i| pcm_frame(i as f64 * 0.02, 20_000, 320))
        .collect();

    let started = std::time::Instant::now();
    let results = run_scenario(config, Box::new(AlwaysSpeech), frames).await;
    assert!(!results.is_empty());
    assert!(started.elapsed() < std::time::Duration::from_millis(500));
}
