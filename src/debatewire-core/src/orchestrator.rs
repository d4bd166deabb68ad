//! Turn engine: the conversation state machine for one side.
//!
//! Drives the hand-off from bootstrap through the greeting, the steady
//! listen/speak loop with its persuasion checkpoints, and counter-driven
//! termination. Each engine owns its socket and its history exclusively;
//! the two sides coordinate only through the signal protocol.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::config::{RemoteConfig, SamplingParams, SessionConfig, Side, START_INSTRUCTION};
use crate::error::DebateError;
use crate::history::History;
use crate::model::ModelClient;
use crate::persuasion::{persuaded_personality, PersuasionSchedule};
use crate::protocol::{Connection, Signal, WireEvent};
use crate::tts::VoiceLink;

/// Conversation states for one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Bootstrapping,
    Greeting,
    Listening,
    Speaking,
    Terminated,
}

/// A produced or heard utterance, in session order.
#[derive(Debug, Clone, PartialEq)]
pub struct SpokenTurn {
    /// Side that produced the utterance.
    pub side: Side,
    pub speaker: String,
    pub text: String,
}

/// Events surfaced to the embedding display layer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// This side is about to generate and transmit.
    TurnStart { side: Side, speaker: String },
    /// This side produced an utterance.
    Spoke { speaker: String, text: String },
    /// The peer's utterance was received.
    Heard { speaker: String, text: String },
    /// A personality rewrite was applied or transmitted.
    PersonalityShift { target: Side },
    /// One exchange remains before the session ends.
    ClosingSoon,
    /// The session terminated cleanly.
    SessionEnd { utterances: usize },
}

/// Callback for session events.
pub type SessionCallback = Box<dyn Fn(SessionEvent) + Send + Sync>;

/// Persuasion authority, held by the configuration-owning side only.
struct Persuasion {
    schedule: PersuasionSchedule,
    loser: Side,
    loser_personality: String,
    winner_opinion: String,
}

enum Flow {
    Continue,
    End,
}

/// The conversation state machine for one side of the session.
pub struct TurnEngine<S> {
    conn: Connection<S>,
    side: Side,
    starting_side: Side,
    final_producer: Side,
    model_id: String,
    sampling: SamplingParams,
    topic_prompt: String,
    start_message: String,
    own_name: String,
    model: Box<dyn ModelClient>,
    voice: Box<dyn VoiceLink>,
    history: History,
    transcript: Vec<SpokenTurn>,
    remaining: u32,
    state: EngineState,
    final_exchange: bool,
    forewarned: bool,
    persuasion: Option<Persuasion>,
    callback: Option<SessionCallback>,
    last_utterance: Option<String>,
}

impl<S> TurnEngine<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Engine for the configuration-owning side. The connection must have
    /// completed the bootstrap handshake.
    pub fn server(
        conn: Connection<S>,
        config: &SessionConfig,
        model: Box<dyn ModelClient>,
        voice: Box<dyn VoiceLink>,
    ) -> Self {
        let winner = config.winner();
        let loser = winner.opposite();
        let persuasion = Persuasion {
            schedule: PersuasionSchedule::new(config.convince_time, config.convince_time_definitive),
            loser,
            loser_personality: config.composed_personality(loser),
            winner_opinion: config.side(winner).opinion.clone(),
        };

        Self {
            conn,
            side: Side::Server,
            starting_side: config.starting_side,
            final_producer: config.final_producer(),
            model_id: config.server.model.clone(),
            sampling: config.sampling,
            topic_prompt: config.debate_prompt(),
            start_message: START_INSTRUCTION.to_string(),
            own_name: config
                .server
                .name
                .clone()
                .unwrap_or_else(|| Side::Server.label().to_string()),
            model,
            voice,
            history: History::seeded(config.composed_personality(Side::Server)),
            transcript: Vec::new(),
            remaining: config.budget,
            state: EngineState::Bootstrapping,
            final_exchange: false,
            forewarned: false,
            persuasion: Some(persuasion),
            callback: None,
            last_utterance: None,
        }
    }

    /// Engine for the connecting side, configured from the bootstrap
    /// reply.
    pub fn client(
        conn: Connection<S>,
        remote: &RemoteConfig,
        model: Box<dyn ModelClient>,
        voice: Box<dyn VoiceLink>,
    ) -> Self {
        let starting_side = remote.starting_side();
        let final_producer = if remote.conversation_length % 2 == 1 {
            starting_side
        } else {
            starting_side.opposite()
        };

        Self {
            conn,
            side: Side::Client,
            starting_side,
            final_producer,
            model_id: remote.model.clone(),
            sampling: remote.sampling(),
            topic_prompt: remote.topic.clone(),
            start_message: remote.start_message.clone(),
            own_name: remote.name.clone(),
            model,
            voice,
            history: History::seeded(remote.personality.clone()),
            transcript: Vec::new(),
            remaining: remote.conversation_length,
            state: EngineState::Bootstrapping,
            final_exchange: false,
            forewarned: false,
            persuasion: None,
            callback: None,
            last_utterance: None,
        }
    }

    /// Set a callback for session events.
    pub fn with_callback(mut self, callback: SessionCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Current system/personality text, for display.
    pub fn personality_text(&self) -> &str {
        self.history.system_text()
    }

    /// Most recent utterance on either side, for display.
    pub fn last_utterance(&self) -> Option<&str> {
        self.last_utterance.as_deref()
    }

    pub fn transcript(&self) -> &[SpokenTurn] {
        &self.transcript
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Run the session to completion.
    ///
    /// Any protocol violation, transport failure, or model failure aborts
    /// the whole session; buffered audio is flushed on every exit path.
    pub async fn run(&mut self) -> Result<Vec<SpokenTurn>, DebateError> {
        let outcome = self.run_inner().await;
        match self.voice.finish() {
            Ok(Some(path)) => info!(path = %path.display(), "session audio saved"),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "failed to flush session audio"),
        }
        outcome?;
        self.state = EngineState::Terminated;
        self.emit(SessionEvent::SessionEnd {
            utterances: self.transcript.len(),
        });
        info!(side = %self.side, utterances = self.transcript.len(), "session terminated");
        Ok(self.transcript.clone())
    }

    async fn run_inner(&mut self) -> Result<(), DebateError> {
        info!(side = %self.side, starting = %self.starting_side, remaining = self.remaining, "session start");
        self.state = EngineState::Greeting;

        let mut flow = if self.starting_side == self.side {
            self.produce_opening().await?
        } else {
            self.consume_opening().await?
        };
        if let Flow::Continue = flow {
            flow = self.after_turn().await?;
        }

        let mut next_producer = self.starting_side.opposite();
        while let Flow::Continue = flow {
            flow = if next_producer == self.side {
                self.produce_turn().await?
            } else {
                self.consume_turn().await?
            };
            if let Flow::Continue = flow {
                flow = self.after_turn().await?;
            }
            next_producer = next_producer.opposite();
        }
        Ok(())
    }

    /// Opening turn for the starting side: prompt built from the topic
    /// and the start instruction rather than a received utterance.
    async fn produce_opening(&mut self) -> Result<Flow, DebateError> {
        let prompt = format!(
            "Context: 'This is the first message of the conversation'\nTopic: {}\nInstructions: {}\nYour opinion:",
            self.topic_prompt, self.start_message
        );
        self.history.push_user(prompt);
        self.produce_turn().await
    }

    /// Opening turn for the responding side: the received text is folded
    /// into the topic seed rather than stored as a bare utterance.
    async fn consume_opening(&mut self) -> Result<Flow, DebateError> {
        match self.consume_utterance().await? {
            Some(text) => {
                let seeded = format!(
                    "{}\n\n------------------------------\n{}",
                    self.topic_prompt, text
                );
                self.history.push_user(seeded);
                Ok(Flow::Continue)
            }
            None => Ok(Flow::End),
        }
    }

    /// One full speaking turn: generate, handshake, transmit, decrement.
    async fn produce_turn(&mut self) -> Result<Flow, DebateError> {
        self.state = EngineState::Speaking;
        self.emit(SessionEvent::TurnStart {
            side: self.side,
            speaker: self.own_name.clone(),
        });

        self.conn.send_signal(Signal::Listen).await?;
        if let Flow::End = self.next_expected(Signal::Speak).await? {
            return Ok(Flow::End);
        }

        // Generate only after the peer acknowledged: a personality change
        // interleaved with the SPEAK ack must shape this utterance.
        let text = self
            .model
            .complete(&self.model_id, &self.sampling, &self.history)
            .await?;
        self.history.push_assistant(text.clone());

        self.conn
            .send_event(&WireEvent::Utterance {
                speaker: self.own_name.clone(),
                text: text.clone(),
            })
            .await?;
        self.voice.speak(self.side, &text)?;
        self.conn.send_signal(Signal::Stop).await?;

        self.remaining = self.remaining.saturating_sub(1);
        debug!(side = %self.side, remaining = self.remaining, "utterance produced");
        self.last_utterance = Some(text.clone());
        self.transcript.push(SpokenTurn {
            side: self.side,
            speaker: self.own_name.clone(),
            text: text.clone(),
        });
        self.emit(SessionEvent::Spoke {
            speaker: self.own_name.clone(),
            text,
        });
        Ok(Flow::Continue)
    }

    /// One full listening turn; the received text lands in the history as
    /// a plain utterance.
    async fn consume_turn(&mut self) -> Result<Flow, DebateError> {
        match self.consume_utterance().await? {
            Some(text) => {
                self.history.push_user(text);
                Ok(Flow::Continue)
            }
            None => Ok(Flow::End),
        }
    }

    /// Listen handshake: LISTEN -> SPEAK -> utterance -> STOP. Returns
    /// `None` when the peer ended the session instead.
    async fn consume_utterance(&mut self) -> Result<Option<String>, DebateError> {
        self.state = EngineState::Listening;

        if let Flow::End = self.next_expected(Signal::Listen).await? {
            return Ok(None);
        }
        self.voice.capture_start()?;
        self.conn.send_signal(Signal::Speak).await?;

        let (speaker, text) = loop {
            match self.conn.recv_event().await? {
                WireEvent::Utterance { speaker, text } => break (speaker, text),
                WireEvent::PersonalityChange { text } => self.apply_personality(text),
                WireEvent::Signal(Signal::EndInOne) => self.note_closing(),
                WireEvent::Signal(Signal::End) => return Ok(None),
                other => return Err(self.unexpected("utterance", other)),
            }
        };
        if let Flow::End = self.next_expected(Signal::Stop).await? {
            return Ok(None);
        }

        // Transcription, when available, wins over the envelope text.
        let transcribed = self.voice.capture_stop_and_transcribe()?;
        let text = transcribed.unwrap_or(text);

        self.remaining = self.remaining.saturating_sub(1);
        debug!(side = %self.side, from = %speaker, remaining = self.remaining, "utterance received");
        self.last_utterance = Some(text.clone());
        self.transcript.push(SpokenTurn {
            side: self.side.opposite(),
            speaker: speaker.clone(),
            text: text.clone(),
        });
        self.emit(SessionEvent::Heard {
            speaker,
            text: text.clone(),
        });
        Ok(Some(text))
    }

    /// Wait for `want`, absorbing control envelopes that may legally
    /// interleave: two envelopes can share one frame, so a personality
    /// change or an END-IN-ONE can land exactly where a handshake signal
    /// is expected.
    async fn next_expected(&mut self, want: Signal) -> Result<Flow, DebateError> {
        loop {
            match self.conn.recv_event().await? {
                WireEvent::Signal(signal) if signal == want => return Ok(Flow::Continue),
                WireEvent::Signal(Signal::End) => return Ok(Flow::End),
                WireEvent::Signal(Signal::EndInOne) => self.note_closing(),
                WireEvent::PersonalityChange { text } => self.apply_personality(text),
                other => return Err(self.unexpected(want.token(), other)),
            }
        }
    }

    /// Post-decrement bookkeeping: counter-driven termination, persuasion
    /// checkpoints, and the END-IN-ONE advisory.
    async fn after_turn(&mut self) -> Result<Flow, DebateError> {
        if self.remaining == 0 {
            self.close_session().await?;
            return Ok(Flow::End);
        }
        self.maybe_persuade().await?;
        self.maybe_forewarn().await?;
        Ok(Flow::Continue)
    }

    /// Counter exhausted. The configuration owner announces END; the peer
    /// waits for it so the shutdown is acknowledged on both ends before
    /// the socket goes away.
    async fn close_session(&mut self) -> Result<(), DebateError> {
        if self.side == Side::Server {
            debug!("message budget exhausted, sending END");
            self.conn.send_signal(Signal::End).await?;
        } else {
            debug!("message budget exhausted, awaiting END");
            loop {
                match self.conn.recv_event().await? {
                    WireEvent::Signal(Signal::End) => break,
                    WireEvent::Signal(Signal::EndInOne) => self.note_closing(),
                    WireEvent::PersonalityChange { text } => self.apply_personality(text),
                    other => return Err(self.unexpected(Signal::End.token(), other)),
                }
            }
        }
        Ok(())
    }

    async fn maybe_persuade(&mut self) -> Result<(), DebateError> {
        let (target, text) = {
            let Some(persuasion) = self.persuasion.as_mut() else {
                return Ok(());
            };
            let Some(stage) = persuasion.schedule.check(self.remaining) else {
                return Ok(());
            };
            info!(loser = %persuasion.loser, ?stage, remaining = self.remaining, "persuasion checkpoint");
            (
                persuasion.loser,
                persuaded_personality(
                    stage,
                    &persuasion.loser_personality,
                    &persuasion.winner_opinion,
                ),
            )
        };

        if target == self.side {
            self.history.replace_system(text);
        } else {
            self.conn
                .send_event(&WireEvent::PersonalityChange { text })
                .await?;
        }
        self.emit(SessionEvent::PersonalityShift { target });
        Ok(())
    }

    /// Advisory only: the peer terminates on its own counter either way.
    async fn maybe_forewarn(&mut self) -> Result<(), DebateError> {
        if self.side == Side::Server
            && self.remaining == 1
            && self.final_producer != self.side
            && !self.forewarned
        {
            self.forewarned = true;
            debug!("one utterance left, sending END-IN-ONE");
            self.conn.send_signal(Signal::EndInOne).await?;
        }
        Ok(())
    }

    fn apply_personality(&mut self, text: String) {
        debug!(side = %self.side, "personality replaced");
        self.history.replace_system(text);
        self.emit(SessionEvent::PersonalityShift { target: self.side });
    }

    fn note_closing(&mut self) {
        if !self.final_exchange {
            self.final_exchange = true;
            debug!(side = %self.side, "peer forewarned the final exchange");
            self.emit(SessionEvent::ClosingSoon);
        }
    }

    fn unexpected(&self, expected: &str, actual: WireEvent) -> DebateError {
        DebateError::Protocol {
            expected: expected.to_string(),
            actual: actual.describe(),
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(ref callback) = self.callback {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;
    use crate::config::{SamplingParams, SideConfig};
    use crate::tts::SilentVoice;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::DuplexStream;

    /// Deterministic stand-in for the hosted model.
    struct ScriptedModel {
        prefix: &'static str,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(prefix: &'static str) -> Self {
            Self {
                prefix,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn complete(
            &self,
            _model: &str,
            _sampling: &SamplingParams,
            _history: &History,
        ) -> Result<String, DebateError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("{} argument {}", self.prefix, n))
        }

        async fn generate_name(
            &self,
            _model: &str,
            _sampling: &SamplingParams,
            _blacklisted: Option<&str>,
        ) -> Result<String, DebateError> {
            Ok("Testa".to_string())
        }
    }

    fn test_config(budget: u32, starting_side: Side, winner: Option<Side>) -> SessionConfig {
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
            starting_side,
            winner,
            budget,
            convince_time: 2,
            convince_time_definitive: 1,
            sampling: SamplingParams::default(),
        }
    }

    type FinishedEngine = (TurnEngine<DuplexStream>, Vec<SpokenTurn>);

    /// Bootstrap and run both sides over an in-memory transport.
    async fn run_pair(
        config: &SessionConfig,
        client_callback: Option<SessionCallback>,
    ) -> (FinishedEngine, FinishedEngine) {
        let (server_io, client_io) = tokio::io::duplex(256 * 1024);
        let remote = config.remote_config();

        let server_task = async {
            let mut conn = Connection::new(server_io);
            bootstrap::accept_handshake(&mut conn, remote).await.unwrap();
            let mut engine = TurnEngine::server(
                conn,
                config,
                Box::new(ScriptedModel::new("server")),
                Box::new(SilentVoice),
            );
            let transcript = engine.run().await.unwrap();
            (engine, transcript)
        };

        let client_task = async {
            let mut conn = Connection::new(client_io);
            let reply = bootstrap::connect_handshake(&mut conn).await.unwrap();
            let mut engine = TurnEngine::client(
                conn,
                &reply.configuration,
                Box::new(ScriptedModel::new("client")),
                Box::new(SilentVoice),
            );
            if let Some(callback) = client_callback {
                engine = engine.with_callback(callback);
            }
            let transcript = engine.run().await.unwrap();
            (engine, transcript)
        };

        tokio::join!(server_task, client_task)
    }

    fn assert_strict_alternation(transcript: &[SpokenTurn], starter: Side) {
        let mut expected = starter;
        for turn in transcript {
            assert_eq!(turn.side, expected, "out-of-order turn: {turn:?}");
            expected = expected.opposite();
        }
    }

    #[tokio::test]
    async fn full_session_budget_five_server_starts_server_wins() {
        let config = test_config(5, Side::Server, Some(Side::Server));
        let ((server, server_transcript), (client, client_transcript)) =
            run_pair(&config, None).await;

        // Every utterance was seen exactly once on both sides, strictly
        // alternating from the starter.
        assert_eq!(server_transcript.len(), 5);
        assert_eq!(client_transcript.len(), 5);
        assert_strict_alternation(&server_transcript, Side::Server);
        assert_strict_alternation(&client_transcript, Side::Server);
        assert_eq!(server_transcript, client_transcript);

        // Counter exhausted on both sides, never overshot.
        assert_eq!(server.remaining(), 0);
        assert_eq!(client.remaining(), 0);
        assert_eq!(server.state(), EngineState::Terminated);
        assert_eq!(client.state(), EngineState::Terminated);

        // The losing client ended up on the definitive template; the
        // winning server kept its original stance.
        assert!(client.personality_text().contains("completely convinced"));
        assert!(client.personality_text().contains("cats are better"));
        assert_eq!(
            server.personality_text(),
            config.composed_personality(Side::Server)
        );

        // Histories agree on the exchange count up to the asymmetric
        // greeting (the starter carries one extra prompt record).
        assert_eq!(server.history().exchange_count(), 6);
        assert_eq!(client.history().exchange_count(), 5);
    }

    #[tokio::test]
    async fn forewarning_and_remote_persuasion_reach_the_client() {
        let config = test_config(4, Side::Server, None);
        // Parity: the client produces last, so the derived winner is the
        // server and the client is persuaded over the wire.
        assert_eq!(config.winner(), Side::Server);

        let events: Arc<Mutex<Vec<SessionEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: SessionCallback = Box::new(move |event| sink.lock().unwrap().push(event));

        let ((_server, server_transcript), (client, client_transcript)) =
            run_pair(&config, Some(callback)).await;

        assert_eq!(server_transcript.len(), 4);
        assert_eq!(client_transcript.len(), 4);
        assert!(client.personality_text().contains("completely convinced"));

        let events = events.lock().unwrap();
        assert!(
            events
                .iter()
                .any(|e| matches!(e, SessionEvent::ClosingSoon)),
            "client never saw the END-IN-ONE advisory"
        );
        let shifts = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::PersonalityShift { .. }))
            .count();
        assert_eq!(shifts, 2, "expected wavering and definitive rewrites");
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::SessionEnd { utterances: 4 })));
    }

    #[tokio::test]
    async fn client_starts_and_server_persuades_itself() {
        let config = test_config(4, Side::Client, None);
        // Parity: the server produces last, loses, and rewrites its own
        // personality locally without any wire traffic.
        assert_eq!(config.winner(), Side::Client);

        let ((server, server_transcript), (client, client_transcript)) =
            run_pair(&config, None).await;

        assert_eq!(server_transcript.len(), 4);
        assert_strict_alternation(&server_transcript, Side::Client);
        assert_eq!(server_transcript, client_transcript);

        assert!(server.personality_text().contains("completely convinced"));
        assert!(server.personality_text().contains("dogs are better"));
        // The winning client never saw a personality envelope.
        assert!(!client.personality_text().contains("convinced"));
    }

    #[tokio::test]
    async fn minimal_budget_terminates_after_two_utterances() {
        let mut config = test_config(2, Side::Server, None);
        config.convince_time = 0;
        config.convince_time_definitive = 0;

        let ((server, server_transcript), (client, client_transcript)) =
            run_pair(&config, None).await;

        assert_eq!(server_transcript.len(), 2);
        assert_eq!(client_transcript.len(), 2);
        assert_eq!(server.remaining(), 0);
        assert_eq!(client.remaining(), 0);
    }

    #[tokio::test]
    async fn disabled_schedule_leaves_both_personalities_alone() {
        let mut config = test_config(5, Side::Server, Some(Side::Server));
        config.convince_time = 0;
        config.convince_time_definitive = 0;

        let ((server, _), (client, _)) = run_pair(&config, None).await;

        assert_eq!(
            server.personality_text(),
            config.composed_personality(Side::Server)
        );
        assert_eq!(
            client.personality_text(),
            config.composed_personality(Side::Client)
        );
    }

    #[tokio::test]
    async fn single_utterance_budget_is_greeting_then_end() {
        let mut config = test_config(1, Side::Server, None);
        config.convince_time = 0;
        config.convince_time_definitive = 0;

        let ((server, server_transcript), (client, client_transcript)) =
            run_pair(&config, None).await;

        assert_eq!(server_transcript.len(), 1);
        assert_eq!(client_transcript.len(), 1);
        assert_eq!(server_transcript[0].side, Side::Server);
        assert_eq!(server.remaining(), 0);
        assert_eq!(client.remaining(), 0);
    }

    #[tokio::test]
    async fn engine_reports_display_getters() {
        let config = test_config(3, Side::Server, None);
        let ((server, transcript), _) = run_pair(&config, None).await;

        assert_eq!(server.last_utterance(), Some(transcript[2].text.as_str()));
        assert_eq!(server.transcript(), transcript.as_slice());
    }
}
