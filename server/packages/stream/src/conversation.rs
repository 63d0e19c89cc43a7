use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque conversation id issued by the upstream agent service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            timestamp: Utc::now(),
        }
    }
}

/// Ordered turns of one chat plus the upstream session they belong to.
///
/// While a reply is streaming, the assistant turn being built is always the
/// last element and every fragment extends it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    session_id: Option<SessionId>,
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Binds the conversation to an upstream session. The first id wins;
    /// returns `false` if one was already set.
    pub fn set_session_id(&mut self, id: SessionId) -> bool {
        if self.session_id.is_some() {
            return false;
        }
        self.session_id = Some(id);
        true
    }

    pub fn append_user_turn(&mut self, text: impl Into<String>) -> &Turn {
        self.turns.push(Turn::new(Role::User, text.into()));
        &self.turns[self.turns.len() - 1]
    }

    pub fn append_or_extend_assistant_turn(&mut self, delta: &str) -> &Turn {
        if let Some(last) = self
            .turns
            .last_mut()
            .filter(|turn| turn.role == Role::Assistant)
        {
            last.content.push_str(delta);
        } else {
            self.turns
                .push(Turn::new(Role::Assistant, delta.to_string()));
        }
        &self.turns[self.turns.len() - 1]
    }

    pub fn list(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
