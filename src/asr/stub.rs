//! Deterministic stand-in transcriber for tests and model-less runs.

use crate::error::Result;

use super::Transcriber;

pub struct StubTranscriber {
    utterance_count: u32,
}

impl StubTranscriber {
    pub fn new() -> Self {
        Self { utterance_count: 0 }
    }
}

impl Default for StubTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcriber for StubTranscriber {
    fn transcribe(&mut self, samples: &[f32], _language: Option<&str>) -> Result<(String, f32)> {
        self.utterance_count += 1;
        let text = format!(
            "[stub-{}: {} samples]",
            self.utterance_count,
            samples.len()
        );
        Ok((text, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utterance_count_increments() {
        let mut t = StubTranscriber::new();
        let (first, _) = t.transcribe(&[0.0; 10], None).unwrap();
        let (second, _) = t.transcribe(&[0.0; 10], None).unwrap();
        assert!(first.contains("stub-1"));
        assert!(second.contains("stub-2"));
    }
}
