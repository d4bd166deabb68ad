//! Session configuration and prompt scaffolding.
//!
//! The accepting side owns the full [`SessionConfig`]; the connecting side
//! only ever sees the [`RemoteConfig`] subset handed over at bootstrap.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DebateError;

/// One of the two participants in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Server,
    Client,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Server => Side::Client,
            Side::Client => Side::Server,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Side::Server => "server",
            Side::Client => "client",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Opaque sampling knobs handed through to the model client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Temperature (0 - 2).
    pub temperature: f32,
    /// Avoid repeating the same words (0 - 2).
    pub frequency_penalty: f32,
    /// Avoid repeating the same arguments (0 - 2).
    pub presence_penalty: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            frequency_penalty: 0.8,
            presence_penalty: 0.5,
        }
    }
}

/// Immutable per-side setup. The mutable personality lives in the side's
/// conversation history once the session starts; what is stored here is
/// the original, used to build persuasion rewrites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideConfig {
    /// Model identifier, e.g. "llama-3.3-70b-versatile".
    pub model: String,
    /// The stance this side argues for.
    pub opinion: String,
    /// Free-form personality flavour layered on top of the opinion.
    #[serde(default)]
    pub persona: String,
    /// Display name; generated by the model when absent.
    #[serde(default)]
    pub name: Option<String>,
}

/// Configuration authority held by the accepting side for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub topic: String,
    pub server: SideConfig,
    pub client: SideConfig,
    pub starting_side: Side,
    /// Predetermined winner; derived from parity when unset.
    pub winner: Option<Side>,
    /// Total number of utterances in the session.
    pub budget: u32,
    /// Remaining-message mark where the loser starts to waver. Zero
    /// disables the persuasion schedule.
    pub convince_time: u32,
    /// Remaining-message mark where the loser concedes outright.
    pub convince_time_definitive: u32,
    pub sampling: SamplingParams,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), DebateError> {
        if self.budget == 0 {
            return Err(DebateError::Config(
                "the message budget must be at least 1".to_string(),
            ));
        }
        if self.convince_time != 0 {
            if self.convince_time_definitive >= self.convince_time {
                return Err(DebateError::Config(format!(
                    "convince_time_definitive ({}) must be below convince_time ({})",
                    self.convince_time_definitive, self.convince_time
                )));
            }
            if self.convince_time > self.budget {
                return Err(DebateError::Config(format!(
                    "convince_time ({}) cannot exceed the message budget ({})",
                    self.convince_time, self.budget
                )));
            }
        }
        Ok(())
    }

    pub fn side(&self, side: Side) -> &SideConfig {
        match side {
            Side::Server => &self.server,
            Side::Client => &self.client,
        }
    }

    /// Side that produces the final utterance, by budget parity.
    pub fn final_producer(&self) -> Side {
        if self.budget % 2 == 1 {
            self.starting_side
        } else {
            self.starting_side.opposite()
        }
    }

    /// Predetermined winner. By default the side that does not speak
    /// last, so the loser gets the closing concession.
    pub fn winner(&self) -> Side {
        self.winner.unwrap_or_else(|| self.final_producer().opposite())
    }

    /// Full system-prompt personality for a side: opinion, flavour, and
    /// the standing argumentation instruction.
    pub fn composed_personality(&self, side: Side) -> String {
        let config = self.side(side);
        format!(
            "Your opinion is: {}\n\nYour personality is: {}\nUse arguments, reasons, examples and personal experiences.",
            config.opinion, config.persona
        )
    }

    /// Debate-rules scaffold wrapped around the raw topic; every prompt
    /// that mentions the topic goes through this.
    pub fn debate_prompt(&self) -> String {
        format!(
            "Using your own methods, convince me of your opinion on this topic: {}. \
             Very important: keep your arguments brief and concise, one sentence at most. \
             Do not repeat arguments or opinions. Do not say the number of the argument. \
             Do not roleplay or assume a character. If you are asked to become convinced, do it naturally. \
             Make a single argument or idea per message so the conversation stays clear and effective. \
             If you quote someone, do it no more than once.",
            self.topic
        )
    }

    /// The subset the connecting side needs, in wire shape.
    pub fn remote_config(&self) -> RemoteConfig {
        RemoteConfig {
            model: self.client.model.clone(),
            topic: self.debate_prompt(),
            personality: self.composed_personality(Side::Client),
            name: self
                .client
                .name
                .clone()
                .unwrap_or_else(|| Side::Client.label().to_string()),
            starting_model: match self.starting_side {
                Side::Server => 0,
                Side::Client => 1,
            },
            conversation_length: self.budget,
            conversation_temperature: self.sampling.temperature,
            frequency_penalty: self.sampling.frequency_penalty,
            presence_penalty: self.sampling.presence_penalty,
            start_message: START_INSTRUCTION.to_string(),
        }
    }
}

/// Client-visible configuration, transmitted once at bootstrap. Field
/// names are wire-format constants; do not rename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub model: String,
    pub topic: String,
    pub personality: String,
    pub name: String,
    /// 0 = server opens the debate, 1 = client opens.
    pub starting_model: u8,
    pub conversation_length: u32,
    pub conversation_temperature: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub start_message: String,
}

impl RemoteConfig {
    pub fn starting_side(&self) -> Side {
        if self.starting_model == 0 {
            Side::Server
        } else {
            Side::Client
        }
    }

    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.conversation_temperature,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
        }
    }
}

/// Opening-turn instruction given to whichever side starts.
pub const START_INSTRUCTION: &str =
    "State your belief and position on the topic clearly, in a single clear sentence. \
     This is the start of the conversation, so you cannot reference past interactions \
     or arguments. Do not include examples or further elaboration.";

/// On-disk session file (TOML) mirroring the serve-side flags.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionFile {
    pub topic: String,
    pub server: SideConfig,
    pub client: SideConfig,
    #[serde(default = "default_budget")]
    pub budget: u32,
    #[serde(default = "default_convince_time")]
    pub convince_time: u32,
    #[serde(default = "default_convince_time_definitive")]
    pub convince_time_definitive: u32,
    #[serde(default)]
    pub starting_side: Option<Side>,
    #[serde(default)]
    pub winner: Option<Side>,
    #[serde(default)]
    pub sampling: SamplingParams,
}

fn default_budget() -> u32 {
    9
}

fn default_convince_time() -> u32 {
    2
}

fn default_convince_time_definitive() -> u32 {
    1
}

impl SessionFile {
    /// Load a session file from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DebateError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| DebateError::Config(format!("failed to read session file: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| DebateError::Config(format!("failed to parse session file: {e}")))
    }

    /// Resolve into a full configuration. `fallback_start` is used when
    /// the file leaves the starting side open.
    pub fn into_config(self, fallback_start: Side) -> SessionConfig {
        SessionConfig {
            topic: self.topic,
            server: self.server,
            client: self.client,
            starting_side: self.starting_side.unwrap_or(fallback_start),
            winner: self.winner,
            budget: self.budget,
            convince_time: self.convince_time,
            convince_time_definitive: self.convince_time_definitive,
            sampling: self.sampling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> SessionConfig {
        SessionConfig {
            topic: "cats or dogs".to_string(),
            server: SideConfig {
                model: "model-a".to_string(),
                opinion: "cats are better".to_string(),
                persona: "calm".to_string(),
                name: Some("Aria".to_string()),
            },
            client: SideConfig {
                model: "model-b".to_string(),
                opinion: "dogs are better".to_string(),
                persona: "excitable".to_string(),
                name: Some("Bruno".to_string()),
            },
            starting_side: Side::Server,
            winner: None,
            budget: 9,
            convince_time: 2,
            convince_time_definitive: 1,
            sampling: SamplingParams::default(),
        }
    }

    #[test]
    fn validate_accepts_default_shape() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_inverted_thresholds() {
        let mut config = base_config();
        config.convince_time = 1;
        config.convince_time_definitive = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_threshold_above_budget() {
        let mut config = base_config();
        config.convince_time = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_convince_time_disables_threshold_checks() {
        let mut config = base_config();
        config.convince_time = 0;
        config.convince_time_definitive = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn final_producer_follows_parity() {
        let mut config = base_config();
        config.budget = 9;
        assert_eq!(config.final_producer(), Side::Server);
        config.budget = 8;
        assert_eq!(config.final_producer(), Side::Client);
        config.starting_side = Side::Client;
        assert_eq!(config.final_producer(), Side::Server);
        config.budget = 9;
        assert_eq!(config.final_producer(), Side::Client);
    }

    #[test]
    fn derived_winner_is_not_the_final_producer() {
        let config = base_config();
        assert_eq!(config.winner(), config.final_producer().opposite());

        let mut fixed = base_config();
        fixed.winner = Some(Side::Client);
        assert_eq!(fixed.winner(), Side::Client);
    }

    #[test]
    fn remote_config_carries_the_client_subset() {
        let remote = base_config().remote_config();
        assert_eq!(remote.model, "model-b");
        assert_eq!(remote.name, "Bruno");
        assert_eq!(remote.starting_model, 0);
        assert_eq!(remote.starting_side(), Side::Server);
        assert_eq!(remote.conversation_length, 9);
        assert!(remote.topic.contains("cats or dogs"));
        assert!(remote.personality.contains("dogs are better"));
    }

    #[test]
    fn remote_config_survives_json_round_trip() {
        let remote = base_config().remote_config();
        let raw = serde_json::to_string(&remote).unwrap();
        let parsed: RemoteConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.model, remote.model);
        assert_eq!(parsed.starting_model, remote.starting_model);
        assert_eq!(parsed.start_message, remote.start_message);
    }

    #[test]
    fn session_file_parses_with_defaults() {
        let raw = r#"
            topic = "open source"

            [server]
            model = "model-a"
            opinion = "software should be free"

            [client]
            model = "model-b"
            opinion = "software should be paid"
        "#;
        let file: SessionFile = toml::from_str(raw).unwrap();
        assert_eq!(file.budget, 9);
        assert_eq!(file.convince_time, 2);
        assert_eq!(file.convince_time_definitive, 1);
        assert!(file.starting_side.is_none());

        let config = file.into_config(Side::Client);
        assert_eq!(config.starting_side, Side::Client);
        assert!(config.validate().is_ok());
    }
}
