use std::sync::Arc;
use std::time::Instant;

use agent_chat_error::ChatError;
use agent_chat_stream::SessionId;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use crate::config::UpstreamConfig;
use crate::history::HistoryItem;

const JSON_API_CONTENT_TYPE: &str = "application/vnd.api+json";

/// Live upstream response body, read chunk by chunk. Read failures after
/// the headers arrived surface as [`ChatError::StreamRead`].
pub type ByteStream = BoxStream<'static, Result<Bytes, ChatError>>;

#[derive(Debug, Serialize)]
struct CreateChatRequest<'a> {
    data: CreateChatData<'a>,
}

#[derive(Debug, Serialize)]
struct CreateChatData<'a> {
    #[serde(rename = "type")]
    type_: &'static str,
    attributes: CreateChatAttributes<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateChatAttributes<'a> {
    agent_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateChatResponse {
    data: CreatedChat,
}

#[derive(Debug, Deserialize)]
struct CreatedChat {
    id: String,
}

#[derive(Debug, Serialize)]
struct ContinueChatRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    data: Vec<HistoryItem>,
}

/// Talks to the hosted agent API. Every call is a single attempt; failures
/// are returned to the caller unchanged.
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: Client,
    config: Arc<UpstreamConfig>,
}

impl AgentClient {
    pub fn new(config: UpstreamConfig) -> Result<Self, ChatError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build().map_err(|err| {
            ChatError::configuration(format!("failed to build upstream http client: {err}"))
        })?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    pub async fn create_session(&self) -> Result<SessionId, ChatError> {
        const OPERATION: &str = "create chat";

        let api_key = self.config.api_key()?;
        let agent_id = self.config.agent_id()?;
        let url = self.endpoint("api/chats");

        tracing::info!(
            url = %url,
            agent_id = %agent_id,
            has_api_key = true,
            "creating upstream chat"
        );

        let body = serde_json::to_vec(&CreateChatRequest {
            data: CreateChatData {
                type_: "chats",
                attributes: CreateChatAttributes { agent_id },
            },
        })
        .map_err(|err| ChatError::Transport {
            operation: OPERATION.to_string(),
            message: format!("failed to encode request: {err}"),
        })?;

        let response = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, JSON_API_CONTENT_TYPE)
            .header(AUTHORIZATION, authorization(api_key))
            .body(body)
            .send()
            .await
            .map_err(|err| transport_error(OPERATION, err))?;
        let response = ensure_success(OPERATION, response).await?;

        let created: CreateChatResponse = response
            .json()
            .await
            .map_err(|err| transport_error(OPERATION, err))?;
        tracing::info!(chat_id = %created.data.id, "upstream chat created");
        Ok(SessionId::new(created.data.id))
    }

    /// Posts a user turn and returns the reply body without reading it.
    pub async fn continue_session(
        &self,
        session_id: &SessionId,
        input: &str,
    ) -> Result<ByteStream, ChatError> {
        const OPERATION: &str = "continue chat";

        let api_key = self.config.api_key()?;
        let url = self.endpoint(&format!("api/chats/{session_id}/continue"));
        let started = Instant::now();

        tracing::info!(
            chat_id = %session_id,
            input_bytes = input.len(),
            "continuing upstream chat"
        );

        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, authorization(api_key))
            .json(&ContinueChatRequest { input })
            .send()
            .await
            .map_err(|err| transport_error(OPERATION, err))?;
        let response = ensure_success(OPERATION, response).await?;

        tracing::debug!(
            chat_id = %session_id,
            headers_ms = started.elapsed().as_millis() as u64,
            "upstream reply stream opened"
        );
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ChatError::stream_read))
            .boxed())
    }

    pub async fn history(&self, agent_id: &str, limit: usize) -> Result<Vec<HistoryItem>, ChatError> {
        const OPERATION: &str = "load chat history";

        let api_key = self.config.api_key()?;
        let url = self.endpoint(&format!("api/agents/{agent_id}/chats"));

        tracing::debug!(agent_id = %agent_id, limit = limit, "loading upstream chat history");

        let response = self
            .http
            .get(&url)
            .query(&[("limit", limit)])
            .header(AUTHORIZATION, authorization(api_key))
            .send()
            .await
            .map_err(|err| transport_error(OPERATION, err))?;
        let response = ensure_success(OPERATION, response).await?;

        let history: HistoryResponse = response
            .json()
            .await
            .map_err(|err| transport_error(OPERATION, err))?;
        Ok(history.data)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
    }
}

fn authorization(api_key: &str) -> String {
    format!("TD1 {api_key}")
}

async fn ensure_success(operation: &str, response: Response) -> Result<Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::error!(
        operation = operation,
        status = status.as_u16(),
        body = %body,
        "upstream request failed"
    );
    Err(ChatError::Upstream {
        operation: operation.to_string(),
        status: status.as_u16(),
        body,
    })
}

fn transport_error(operation: &str, err: reqwest::Error) -> ChatError {
    tracing::error!(operation = operation, error = %err, "upstream transport error");
    ChatError::Transport {
        operation: operation.to_string(),
        message: err.to_string(),
    }
}
