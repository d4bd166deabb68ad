//! Control-signal vocabulary and the framed envelope connection.
//!
//! Everything on the wire is an [`Envelope`], a flat `{"name", "message"}`
//! JSON object. Envelopes are decoded exactly once, at the transport
//! boundary, into a [`WireEvent`] so no downstream code compares sentinel
//! strings.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;

use crate::error::DebateError;
use crate::wire::{recv_frame, recv_frame_timeout, send_frame};

/// `name` sentinel carried by signal envelopes.
pub const SYSTEM_SENTINEL: &str = "system";

/// `name` sentinel carried by personality-change envelopes.
pub const PERSONALITY_SENTINEL: &str = "personality";

/// Reserved control tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// "I am about to produce; start listening."
    Listen,
    /// "Go ahead, I am listening."
    Speak,
    /// "Finished producing; stop listening."
    Stop,
    /// "The conversation is over, terminate now."
    End,
    /// "One more exchange remains, then terminate."
    EndInOne,
}

impl Signal {
    pub fn token(self) -> &'static str {
        match self {
            Signal::Listen => "LISTEN",
            Signal::Speak => "SPEAK",
            Signal::Stop => "STOP",
            Signal::End => "END",
            Signal::EndInOne => "END-IN-ONE",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "LISTEN" => Some(Signal::Listen),
            "SPEAK" => Some(Signal::Speak),
            "STOP" => Some(Signal::Stop),
            "END" => Some(Signal::End),
            "END-IN-ONE" => Some(Signal::EndInOne),
            _ => None,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// One wire unit, exactly `{"name": <string>, "message": <string>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub name: String,
    pub message: String,
}

/// An envelope decoded at the transport boundary.
///
/// A `message` in the reserved token set is always a signal, whatever the
/// `name` says; a `name` of `"personality"` marks a personality change;
/// anything else is an utterance from the named speaker.
#[derive(Debug, Clone, PartialEq)]
pub enum WireEvent {
    Signal(Signal),
    PersonalityChange { text: String },
    Utterance { speaker: String, text: String },
}

impl WireEvent {
    pub fn decode(envelope: Envelope) -> Self {
        if envelope.name == PERSONALITY_SENTINEL {
            WireEvent::PersonalityChange {
                text: envelope.message,
            }
        } else if let Some(signal) = Signal::from_token(&envelope.message) {
            WireEvent::Signal(signal)
        } else {
            WireEvent::Utterance {
                speaker: envelope.name,
                text: envelope.message,
            }
        }
    }

    pub fn encode(&self) -> Envelope {
        match self {
            WireEvent::Signal(signal) => Envelope {
                name: SYSTEM_SENTINEL.to_string(),
                message: signal.token().to_string(),
            },
            WireEvent::PersonalityChange { text } => Envelope {
                name: PERSONALITY_SENTINEL.to_string(),
                message: text.clone(),
            },
            WireEvent::Utterance { speaker, text } => Envelope {
                name: speaker.clone(),
                message: text.clone(),
            },
        }
    }

    /// Short form for protocol diagnostics.
    pub fn describe(&self) -> String {
        match self {
            WireEvent::Signal(signal) => signal.token().to_string(),
            WireEvent::PersonalityChange { .. } => "personality change".to_string(),
            WireEvent::Utterance { speaker, .. } => format!("utterance from {speaker}"),
        }
    }
}

/// Split a received buffer into its envelopes.
///
/// Two rapid sends can land in one buffer; the streaming deserializer
/// walks successive top-level JSON objects instead of assuming one object
/// per receive.
pub fn split_envelopes(buf: &[u8]) -> Result<Vec<Envelope>, DebateError> {
    let mut envelopes = Vec::new();
    for entry in serde_json::Deserializer::from_slice(buf).into_iter::<Envelope>() {
        let envelope = entry.map_err(|e| DebateError::PayloadDecode(e.to_string()))?;
        envelopes.push(envelope);
    }
    if envelopes.is_empty() {
        return Err(DebateError::PayloadDecode("empty payload".to_string()));
    }
    Ok(envelopes)
}

/// Exclusive owner of one side's socket, plus a queue of decoded events
/// that arrived ahead of schedule.
pub struct Connection<S> {
    stream: S,
    pending: VecDeque<WireEvent>,
    recv_timeout: Option<Duration>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            pending: VecDeque::new(),
            recv_timeout: None,
        }
    }

    /// Bound every receive; elapsing surfaces as [`DebateError::Timeout`].
    pub fn with_recv_timeout(mut self, wait: Duration) -> Self {
        self.recv_timeout = Some(wait);
        self
    }

    /// Raw framed bytes. The bootstrap literals travel this way.
    pub async fn send_bytes(&mut self, payload: &[u8]) -> Result<(), DebateError> {
        send_frame(&mut self.stream, payload).await
    }

    pub async fn recv_bytes(&mut self) -> Result<Vec<u8>, DebateError> {
        match self.recv_timeout {
            Some(wait) => recv_frame_timeout(&mut self.stream, wait).await,
            None => recv_frame(&mut self.stream).await,
        }
    }

    pub async fn send_event(&mut self, event: &WireEvent) -> Result<(), DebateError> {
        let envelope = event.encode();
        let payload =
            serde_json::to_vec(&envelope).map_err(|e| DebateError::PayloadDecode(e.to_string()))?;
        trace!(event = %event.describe(), "send");
        self.send_bytes(&payload).await
    }

    pub async fn send_signal(&mut self, signal: Signal) -> Result<(), DebateError> {
        self.send_event(&WireEvent::Signal(signal)).await
    }

    /// Next decoded event, in arrival order, each delivered exactly once.
    pub async fn recv_event(&mut self) -> Result<WireEvent, DebateError> {
        if let Some(event) = self.pending.pop_front() {
            trace!(event = %event.describe(), "recv (queued)");
            return Ok(event);
        }
        let buf = self.recv_bytes().await?;
        let mut events: VecDeque<WireEvent> = split_envelopes(&buf)?
            .into_iter()
            .map(WireEvent::decode)
            .collect();
        let first = events
            .pop_front()
            .ok_or_else(|| DebateError::PayloadDecode("empty payload".to_string()))?;
        self.pending.extend(events);
        trace!(event = %first.describe(), queued = self.pending.len(), "recv");
        Ok(first)
    }

    /// Receive one event and fail unless it is the wanted signal.
    pub async fn expect_signal(&mut self, want: Signal) -> Result<(), DebateError> {
        match self.recv_event().await? {
            WireEvent::Signal(signal) if signal == want => Ok(()),
            other => Err(DebateError::Protocol {
                expected: want.token().to_string(),
                actual: other.describe(),
            }),
        }
    }
}
