//! Real-time speech-input pipeline.
//!
//! ```text
//!  transport (external)
//!        │ Frame
//!        ▼
//!  ┌─────────────┐   push/pop/close, drop-oldest overflow
//!  │   Ingress   │
//!  │   Buffer    │
//!  └──────┬──────┘
//!         │ Frame
//!         ▼
//!  ┌─────────────┐   neural + classical fusion, adaptive onset threshold
//!  │     VAD     │
//!  │   Engine    │
//!  └──────┬──────┘
//!         │ SpeechDecision
//!         ▼
//!  ┌─────────────┐   state machine, adaptive end-of-turn threshold
//!  │ Turn-State  │
//!  │   Tracker   │
//!  └──────┬──────┘
//!         │ is_end_of_turn
//!         ▼
//!  ┌─────────────┐   pre-roll padding, safety-valve flush
//!  │   Segment   │
//!  │   Buffer    │
//!  └──────┬──────┘
//!         │ Utterance
//!         ▼
//!  ┌─────────────┐   shared model, worker pool, concurrency semaphore
//!  │ ASR Front-  │
//!  │    End      │
//!  └──────┬──────┘
//!         │ Transcription
//!         ▼
//!    caller (external: LLM / TTS / transport)
//! ```
//!
//! `Pipeline` in [`pipeline`] owns one instance of each stage per call and
//! drives them from a single orchestrator task.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

/// Installs a `tracing-subscriber` formatter honoring `RUST_LOG`, falling
/// back to `turnstream_core=info` when the env var is unset or invalid.
///
/// Intended for binaries embedding this crate; library code only ever
/// emits through `tracing` and never calls this itself. Safe to call at
/// most once per process — a second call returns an error rather than
/// panicking.
pub fn init_tracing() -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("turnstream_core=info")),
        )
        .try_init()
}

pub mod asr;
pub mod config;
pub mod error;
pub mod ingress;
pub mod init;
pub mod pipeline;
pub mod segment_buffer;
pub mod turn_state;
pub mod vad;

pub use config::PipelineConfig;
pub use error::{CoreError, Result};
pub use ingress::{Frame, IngressBuffer};
pub use pipeline::Pipeline;
pub use segment_buffer::Utterance;
pub use turn_state::TurnStateTracker;
pub use vad::{CompositeDetector, SpeechDecision, SpeechDetector, StubDetector};

#[cfg(feature = "neural-vad")]
pub use vad::{LazyNeuralDetector, NeuralDetector};
#[cfg(feature = "classical-vad")]
pub use vad::ClassicalDetector;
#[cfg(feature = "whisper")]
pub use asr::WhisperAsr;
