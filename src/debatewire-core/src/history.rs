//! Per-side conversation history.
//!
//! Each side keeps its own ordered view of the exchange; the two views
//! are never shared or synchronized beyond what crosses the wire.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub role: ChatRole,
    pub content: String,
}

/// Ordered record of one side's view of the conversation.
///
/// Record 0 is always the current personality text for the side. It is
/// the one record that is replaced in place rather than appended; every
/// other record is append-only.
#[derive(Debug, Clone)]
pub struct History {
    records: Vec<ChatRecord>,
}

impl History {
    pub fn seeded(personality: impl Into<String>) -> Self {
        Self {
            records: vec![ChatRecord {
                role: ChatRole::System,
                content: personality.into(),
            }],
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.records.push(ChatRecord {
            role: ChatRole::User,
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.records.push(ChatRecord {
            role: ChatRole::Assistant,
            content: content.into(),
        });
    }

    /// Overwrite the personality record. The rest of the history is
    /// untouched, so the model sees the new stance against the full
    /// exchange so far.
    pub fn replace_system(&mut self, personality: impl Into<String>) {
        self.records[0] = ChatRecord {
            role: ChatRole::System,
            content: personality.into(),
        };
    }

    pub fn system_text(&self) -> &str {
        &self.records[0].content
    }

    pub fn records(&self) -> &[ChatRecord] {
        &self.records
    }

    /// Number of non-system records.
    pub fn exchange_count(&self) -> usize {
        self.records.len() - 1
    }

    pub fn last(&self) -> Option<&ChatRecord> {
        self.records.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_history_starts_with_system_record() {
        let history = History::seeded("You are stubborn.");
        assert_eq!(history.records().len(), 1);
        assert_eq!(history.records()[0].role, ChatRole::System);
        assert_eq!(history.system_text(), "You are stubborn.");
        assert_eq!(history.exchange_count(), 0);
    }

    #[test]
    fn replace_system_only_touches_record_zero() {
        let mut history = History::seeded("original stance");
        history.push_user("opening");
        history.push_assistant("reply");
        history.replace_system("persuaded stance");

        assert_eq!(history.system_text(), "persuaded stance");
        assert_eq!(history.records().len(), 3);
        assert_eq!(history.records()[1].content, "opening");
        assert_eq!(history.records()[2].content, "reply");
    }

    #[test]
    fn exchange_count_ignores_system_record() {
        let mut history = History::seeded("stance");
        history.push_user("a");
        history.push_assistant("b");
        history.push_user("c");
        assert_eq!(history.exchange_count(), 3);
        assert_eq!(history.last().unwrap().content, "c");
    }
}
