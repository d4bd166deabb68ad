//! Voice output for the debate.
//!
//! The speak/listen handshake runs the same with or without audio. When
//! audio is enabled, every utterance is synthesized with kokoro and the
//! whole session is collected into a single WAV.

use std::path::{Path, PathBuf};

use kokoro_tiny::TtsEngine;

use crate::config::Side;
use crate::error::DebateError;

/// Kokoro output sample rate.
pub const SAMPLE_RATE: u32 = 24_000;

/// Audio collaborators as seen by the turn engine.
///
/// Capture may return `None`, in which case the utterance text from the
/// content envelope is authoritative. The default implementations are
/// no-ops so a text-only session needs no audio stack at all.
pub trait VoiceLink: Send {
    fn capture_start(&mut self) -> Result<(), DebateError> {
        Ok(())
    }

    fn capture_stop_and_transcribe(&mut self) -> Result<Option<String>, DebateError> {
        Ok(None)
    }

    fn speak(&mut self, side: Side, text: &str) -> Result<(), DebateError>;

    /// Flush buffered audio on session end; returns the output path when
    /// audio was written. Called on every exit path, including errors.
    fn finish(&mut self) -> Result<Option<PathBuf>, DebateError> {
        Ok(None)
    }
}

/// No audio at all; the handshake still runs.
pub struct SilentVoice;

impl VoiceLink for SilentVoice {
    fn speak(&mut self, _side: Side, _text: &str) -> Result<(), DebateError> {
        Ok(())
    }
}

/// Kokoro-backed synthesis collecting the session into one WAV.
pub struct KokoroVoice {
    engine: TtsEngine,
    server_voice: String,
    client_voice: String,
    samples: Vec<f32>,
    out_path: PathBuf,
}

impl KokoroVoice {
    /// Initialize the TTS engine (downloads the model on first run) and
    /// validate both voice IDs against it.
    pub async fn new(
        server_voice: impl Into<String>,
        client_voice: impl Into<String>,
        out_path: impl AsRef<Path>,
    ) -> Result<Self, DebateError> {
        let engine = TtsEngine::new()
            .await
            .map_err(|e| DebateError::Tts(format!("failed to initialize TTS: {e}")))?;

        let voice = Self {
            engine,
            server_voice: server_voice.into(),
            client_voice: client_voice.into(),
            samples: Vec::new(),
            out_path: out_path.as_ref().to_path_buf(),
        };
        voice.validate_voice(&voice.server_voice)?;
        voice.validate_voice(&voice.client_voice)?;
        Ok(voice)
    }

    fn validate_voice(&self, voice_id: &str) -> Result<(), DebateError> {
        let available = self.engine.voices();
        if !available.contains(&voice_id.to_string()) {
            return Err(DebateError::Tts(format!(
                "unknown voice '{voice_id}'; available voices: {}",
                available.join(", ")
            )));
        }
        Ok(())
    }

    fn voice_for(&self, side: Side) -> &str {
        match side {
            Side::Server => &self.server_voice,
            Side::Client => &self.client_voice,
        }
    }
}

impl VoiceLink for KokoroVoice {
    fn speak(&mut self, side: Side, text: &str) -> Result<(), DebateError> {
        let voice_id = self.voice_for(side).to_string();

        // Kokoro has a strict input-length limit; synthesize in small
        // chunks with a short pause between them to avoid cutoff.
        for chunk in split_into_chunks(text, 200) {
            if chunk.trim().is_empty() {
                continue;
            }
            let samples = self
                .engine
                .synthesize(&chunk, Some(voice_id.as_str()))
                .map_err(|e| DebateError::Tts(format!("synthesis failed: {e}")))?;
            self.samples.extend(samples);
            self.samples.extend(std::iter::repeat(0.0).take(7_200)); // 0.3s at 24kHz
        }
        self.samples.extend(std::iter::repeat(0.0).take(12_000)); // 0.5s between turns
        Ok(())
    }

    fn finish(&mut self) -> Result<Option<PathBuf>, DebateError> {
        if self.samples.is_empty() {
            return Ok(None);
        }
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&self.out_path, spec)
            .map_err(|e| DebateError::Tts(format!("failed to create WAV: {e}")))?;
        for &sample in &self.samples {
            let scaled = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            writer
                .write_sample(scaled)
                .map_err(|e| DebateError::Tts(format!("failed to write WAV: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| DebateError::Tts(format!("failed to finalize WAV: {e}")))?;
        self.samples.clear();
        Ok(Some(self.out_path.clone()))
    }
}

/// Split text into chunks safe for synthesis, preferring sentence
/// boundaries and falling back to commas for very long sentences.
fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in text.split_inclusive(&['.', '!', '?', ';'][..]) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if current.len() + sentence.len() > max_chars {
            if !current.is_empty() {
                chunks.push(current.trim().to_string());
                current = String::new();
            }
            if sentence.len() > max_chars {
                for part in sentence.split_inclusive(',') {
                    if current.len() + part.len() > max_chars && !current.is_empty() {
                        chunks.push(current.trim().to_string());
                        current = String::new();
                    }
                    current.push_str(part);
                    current.push(' ');
                }
                continue;
            }
        }
        current.push_str(sentence);
        current.push(' ');
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }

    chunks
}

/// Filename for the session WAV, derived from the raw topic.
pub fn session_wav_filename(topic: &str) -> String {
    let sanitized: String = topic
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let truncated = if sanitized.len() > 50 {
        &sanitized[..50]
    } else {
        &sanitized
    };

    format!("DebateWire - {}.wav", truncated.trim())
}
