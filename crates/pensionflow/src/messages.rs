//! Chat transcript model shared by graph nodes, specialists, and the
//! summarizer.

use serde::{Deserialize, Serialize};

/// A single entry in a conversation transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// Instructions injected ahead of the conversation.
    System { content: String },
    /// The end user's words.
    Human { content: String },
    /// Text produced by a model or node.
    Ai { content: String },
    /// A tool observation, tagged with the tool that produced it.
    Tool { content: String, tool_name: String },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::Human {
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::Ai {
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self::Tool {
            content: content.into(),
            tool_name: tool_name.into(),
        }
    }

    /// The textual content of the message, regardless of role.
    pub fn content(&self) -> &str {
        match self {
            Self::System { content }
            | Self::Human { content }
            | Self::Ai { content }
            | Self::Tool { content, .. } => content,
        }
    }

    /// Role label as it appears in serialized transcripts.
    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::Human { .. } => "human",
            Self::Ai { .. } => "ai",
            Self::Tool { .. } => "tool",
        }
    }

    pub fn is_human(&self) -> bool {
        matches!(self, Self::Human { .. })
    }

    pub fn is_ai(&self) -> bool {
        matches!(self, Self::Ai { .. })
    }
}

/// Renders a transcript into the plain-text block specialist prompts embed.
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role(), m.content()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The first human message in a transcript, if any. Supervisors and
/// specialists treat this as the user's original question.
pub fn first_human_content(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .find(|m| m.is_human())
        .map(Message::content)
}
