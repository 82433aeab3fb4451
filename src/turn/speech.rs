//! The speech-synthesis seam: one call per segment, never batched.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Reference to synthesized audio for one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioHandle {
    pub slot: usize,
    pub voice: String,
    /// Where the audio lives, if the synthesizer produced any.
    pub location: Option<String>,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, slot: usize, text: &str, voice: &str) -> Result<AudioHandle>;
}

/// Synthesizer for text-only sessions: every segment gets an empty handle.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSynthesizer;

#[async_trait]
impl SpeechSynthesizer for SilentSynthesizer {
    async fn synthesize(&self, slot: usize, _text: &str, voice: &str) -> Result<AudioHandle> {
        Ok(AudioHandle {
            slot,
            voice: voice.to_string(),
            location: None,
        })
    }
}
