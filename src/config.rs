/// Shared, immutable pipeline configuration. Built once by the caller
/// (session/config-loading is an external collaborator) and handed by
/// reference or cheap clone into every component.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Sample rate all inbound frames are assumed to already be at.
    pub sample_rate: u32,

    /// Capacity of the ingress ring, in frames.
    pub ingress_capacity: usize,
    /// How long `IngressBuffer::pop` waits for a frame before returning `None`.
    pub ingress_poll_timeout_ms: u64,

    /// WebRTC-style classical detector aggressiveness, 0-3.
    pub vad_aggressiveness: u8,
    /// Frame length the classical detector expects, one of 10/20/30 ms.
    pub vad_frame_ms: u32,
    /// Baseline onset threshold before adaptive noise adjustment.
    pub speech_onset_threshold: f32,
    /// Neural-probability floor at which the classical detector's vote
    /// alone can still tip the fusion decision to speech.
    pub classical_corroboration_floor: f32,
    /// Minimum signal-to-noise ratio required for any speech decision.
    pub min_snr: f32,

    /// Minimum silence duration, in ms, before end-of-turn can fire.
    pub base_eot_silence_ms: u64,
    /// Whether `base_eot_silence_ms` is scaled by recent speaking rate
    /// (0.7x/1.2x/1.0x) or used as a fixed threshold.
    pub eot_adaptive_enabled: bool,
    /// Rolling window size for background-noise/energy history.
    pub energy_history_len: usize,
    /// Rolling window size for speaking-rate history.
    pub speaking_rate_history_len: usize,

    /// Pre-roll padding kept before a detected speech onset, in ms.
    pub speech_pad_ms: u64,
    /// Circular pre-speech frame window capacity.
    pub frame_window_capacity: usize,
    /// Minimum speech duration, in ms, for an utterance to be finalized.
    pub min_speech_duration_ms: u64,
    /// Safety-valve ceiling, in ms, forcing a flush regardless of EoT.
    pub max_speech_duration_ms: u64,

    /// Number of ASR worker threads.
    pub asr_workers: usize,
    /// Maximum concurrent ASR jobs admitted via the semaphore.
    pub asr_max_concurrent_jobs: usize,
    pub asr_beam_size: usize,
    pub asr_best_of: usize,

    pub vad_workers: usize,
}

impl PipelineConfig {
    pub fn min_speech_samples(&self) -> usize {
        (self.sample_rate as u64 * self.min_speech_duration_ms / 1000) as usize
    }

    pub fn max_speech_samples(&self) -> usize {
        (self.sample_rate as u64 * self.max_speech_duration_ms / 1000) as usize
    }

    pub fn vad_frame_samples(&self) -> usize {
        (self.sample_rate as u64 * self.vad_frame_ms as u64 / 1000) as usize
    }

    pub fn speech_pad_frames(&self, frame_ms: u64) -> usize {
        ((self.speech_pad_ms + frame_ms - 1) / frame_ms) as usize
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            ingress_capacity: 1_000,
            ingress_poll_timeout_ms: 50,
            vad_aggressiveness: 2,
            vad_frame_ms: 20,
            speech_onset_threshold: 0.5,
            classical_corroboration_floor: 0.3,
            min_snr: 2.0,
            base_eot_silence_ms: 600,
            eot_adaptive_enabled: true,
            energy_history_len: 100,
            speaking_rate_history_len: 10,
            speech_pad_ms: 300,
            frame_window_capacity: 100,
            min_speech_duration_ms: 200,
            max_speech_duration_ms: 15_000,
            asr_workers: 2,
            asr_max_concurrent_jobs: 2,
            asr_beam_size: 5,
            asr_best_of: 5,
            vad_workers: 1,
        }
    }
}
