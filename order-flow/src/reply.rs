use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A quick-reply button attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplyButton {
    pub id: String,
    pub title: String,
}

/// One row of a pick list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
}

/// One outbound chat message. A reply is exactly one of these shapes —
/// plain text, text with quick-reply buttons, or text with a pick list —
/// so the transport layer never has to guess which optional fields matter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BotReply {
    Text {
        body: String,
    },
    Buttons {
        body: String,
        buttons: Vec<ReplyButton>,
    },
    List {
        body: String,
        section_title: String,
        rows: Vec<ListRow>,
    },
}

impl BotReply {
    pub fn text(body: impl Into<String>) -> Self {
        BotReply::Text { body: body.into() }
    }

    pub fn buttons(body: impl Into<String>, buttons: Vec<ReplyButton>) -> Self {
        BotReply::Buttons {
            body: body.into(),
            buttons,
        }
    }

    pub fn list(
        body: impl Into<String>,
        section_title: impl Into<String>,
        rows: Vec<ListRow>,
    ) -> Self {
        BotReply::List {
            body: body.into(),
            section_title: section_title.into(),
            rows,
        }
    }

    /// The message text regardless of shape.
    pub fn body(&self) -> &str {
        match self {
            BotReply::Text { body } => body,
            BotReply::Buttons { body, .. } => body,
            BotReply::List { body, .. } => body,
        }
    }

    /// Shape label, matching the serialized `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            BotReply::Text { .. } => "text",
            BotReply::Buttons { .. } => "buttons",
            BotReply::List { .. } => "list",
        }
    }

    /// Prepend a line to the message text, keeping the shape.
    pub fn with_preamble(mut self, line: impl Into<String>) -> Self {
        let text = match &mut self {
            BotReply::Text { body } => body,
            BotReply::Buttons { body, .. } => body,
            BotReply::List { body, .. } => body,
        };
        *text = format!("{}\n{}", line.into(), text);
        self
    }
}

impl ReplyButton {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

impl ListRow {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Outbound edge of the (out-of-scope) chat transport: delivers one reply
/// to one user. Implementations call the provider API, queue, or record.
#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send(&self, user_id: &str, reply: BotReply) -> Result<()>;
}
