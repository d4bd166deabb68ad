//! DebateWire Core Library
//!
//! Turn-taking protocol, conversation state machine, and collaborator
//! seams for a two-party model-versus-model debate held over a single
//! persistent TCP connection.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod history;
pub mod model;
pub mod orchestrator;
pub mod persuasion;
pub mod protocol;
pub mod tts;
pub mod wire;

pub use bootstrap::{BootstrapReply, INIT_REQUEST, READY_CONFIRMATION};
pub use config::{RemoteConfig, SamplingParams, SessionConfig, SessionFile, Side, SideConfig};
pub use error::DebateError;
pub use history::{ChatRecord, ChatRole, History};
pub use model::{assign_display_names, ModelClient, OpenAiModelClient};
pub use orchestrator::{
    EngineState, SessionCallback, SessionEvent, SpokenTurn, TurnEngine,
};
pub use persuasion::{PersuasionSchedule, PersuasionStage};
pub use protocol::{Connection, Envelope, Signal, WireEvent};
pub use tts::{session_wav_filename, KokoroVoice, SilentVoice, VoiceLink};
