use std::fmt;
use std::time::Duration;

use agent_chat_error::ChatError;

pub const DEFAULT_API_URL: &str = "https://llm-api-development.us01.treasuredata.com";

pub const API_URL_ENV: &str = "TD_API_URL";
pub const API_KEY_ENV: &str = "TD_API_KEY";
pub const AGENT_ID_ENV: &str = "TD_AGENT_ID";

#[derive(Clone)]
pub struct UpstreamConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub agent_id: Option<String>,
    pub connect_timeout: Option<Duration>,
}

impl UpstreamConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: None,
            agent_id: None,
            connect_timeout: None,
        }
    }

    /// Reads `TD_API_URL`, `TD_API_KEY` and `TD_AGENT_ID`. Empty values are
    /// treated as unset.
    pub fn from_env() -> Self {
        Self {
            api_url: env_non_empty(API_URL_ENV).unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key: env_non_empty(API_KEY_ENV),
            agent_id: env_non_empty(AGENT_ID_ENV),
            connect_timeout: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = non_empty(api_key.into());
        self
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = non_empty(agent_id.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub(crate) fn api_key(&self) -> Result<&str, ChatError> {
        self.api_key.as_deref().ok_or_else(|| {
            ChatError::configuration(format!(
                "{API_KEY_ENV} is not set. Configure the agent API key before starting a chat."
            ))
        })
    }

    pub fn agent_id(&self) -> Result<&str, ChatError> {
        self.agent_id.as_deref().ok_or_else(|| {
            ChatError::configuration(format!(
                "{AGENT_ID_ENV} is not set. Configure which agent to chat with."
            ))
        })
    }
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("api_url", &self.api_url)
            .field("has_api_key", &self.api_key.is_some())
            .field("agent_id", &self.agent_id)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(non_empty)
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
