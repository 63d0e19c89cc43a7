use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use agent_chat_error::{ChatError, ErrorBody};
use agent_chat_stream::{ConsumerReport, Conversation, SessionId, StreamConsumer, Turn};
use agent_chat_upstream::HistoryItem;
use futures::StreamExt;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;

use crate::history::{DateRange, HistoryQuery, HistoryResponse};
use crate::router::CreateChatResponse;

#[derive(Debug)]
pub enum SubmitOutcome {
    /// Blank input; nothing was sent.
    Ignored,
    /// A reply is still streaming; nothing was sent.
    Busy,
    Completed {
        report: ConsumerReport,
        /// The reply stream broke off before its end.
        interrupted: bool,
    },
}

#[derive(Debug, Serialize)]
struct ContinueRequest<'a> {
    input: &'a str,
}

/// Terminal-side chat session against an agent-chat server.
///
/// Holds the conversation, the current chat id, the loading flag and the
/// last user-visible error. Only one reply streams at a time; a second
/// `submit` while loading is a no-op.
#[derive(Debug)]
pub struct ChatClient {
    http: Client,
    base_url: String,
    access_token: Option<String>,
    conversation: Mutex<Conversation>,
    loading: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ChatError> {
        let http = Client::builder().build().map_err(|err| {
            ChatError::configuration(format!("failed to build http client: {err}"))
        })?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            access_token: None,
            conversation: Mutex::new(Conversation::new()),
            loading: AtomicBool::new(false),
            last_error: Mutex::new(None),
        })
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token.filter(|token| !token.is_empty());
        self
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    pub fn session_id(&self) -> Option<SessionId> {
        lock(&self.conversation).session_id().cloned()
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    pub fn turns(&self) -> Vec<Turn> {
        lock(&self.conversation).list().to_vec()
    }

    /// Starts over with an empty conversation. Refused while a reply streams.
    pub fn reset(&self) -> bool {
        if self.is_loading() {
            return false;
        }
        *lock(&self.conversation) = Conversation::new();
        *lock(&self.last_error) = None;
        true
    }

    /// Sends one user turn and streams the reply into the conversation.
    ///
    /// `on_delta` receives the assistant text applied from each chunk, in
    /// order. Failures before the reply starts are returned and kept as
    /// [`ChatClient::last_error`]; a reply that breaks off midway keeps what
    /// arrived and reports `interrupted`.
    pub async fn submit<F>(&self, text: &str, mut on_delta: F) -> Result<SubmitOutcome, ChatError>
    where
        F: FnMut(&str),
    {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SubmitOutcome::Ignored);
        }
        if self
            .loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("reply still streaming; ignoring submit");
            return Ok(SubmitOutcome::Busy);
        }
        let _loading = LoadingGuard(&self.loading);

        lock(&self.conversation).append_user_turn(text);
        *lock(&self.last_error) = None;

        match self.run_turn(text, &mut on_delta).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::warn!(error = %err, "chat turn failed");
                *lock(&self.last_error) = Some(err.to_string());
                Err(err)
            }
        }
    }

    async fn run_turn<F>(&self, text: &str, on_delta: &mut F) -> Result<SubmitOutcome, ChatError>
    where
        F: FnMut(&str),
    {
        let session_id = match self.session_id() {
            Some(session_id) => session_id,
            None => {
                let session_id = self.create_chat().await?;
                lock(&self.conversation).set_session_id(session_id.clone());
                session_id
            }
        };

        const OPERATION: &str = "get response";
        let response = self
            .authorized(
                self.http
                    .post(self.endpoint(&format!("api/chat/{session_id}/continue"))),
            )
            .json(&ContinueRequest { input: text })
            .send()
            .await
            .map_err(|err| transport_error(OPERATION, err))?;
        let response = ensure_success(OPERATION, response).await?;

        let mut stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ChatError::stream_read));
        let mut consumer = StreamConsumer::new();
        let mut interrupted = false;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    tracing::warn!(
                        chat_id = %session_id,
                        error = %err,
                        error_type = err.error_type().as_str(),
                        applied_bytes = consumer.accumulated().len(),
                        "reply stream broke off"
                    );
                    interrupted = true;
                    break;
                }
            };
            let before = consumer.accumulated().len();
            {
                let mut conversation = lock(&self.conversation);
                consumer.consume_chunk(&chunk, &mut conversation);
            }
            let delta = &consumer.accumulated()[before..];
            if !delta.is_empty() {
                on_delta(delta);
            }
        }

        let report = consumer.finish();
        tracing::debug!(
            chat_id = %session_id,
            events = report.stats.events,
            applied = report.stats.applied,
            skipped = report.stats.skipped,
            interrupted = interrupted,
            "reply finished"
        );
        Ok(SubmitOutcome::Completed { report, interrupted })
    }

    async fn create_chat(&self) -> Result<SessionId, ChatError> {
        const OPERATION: &str = "create chat session";
        let response = self
            .authorized(self.http.post(self.endpoint("api/chat")))
            .send()
            .await
            .map_err(|err| transport_error(OPERATION, err))?;
        let response = ensure_success(OPERATION, response).await?;
        let created: CreateChatResponse = response
            .json()
            .await
            .map_err(|err| transport_error(OPERATION, err))?;
        tracing::info!(chat_id = %created.chat_id, "chat session created");
        Ok(created.chat_id)
    }

    pub async fn history(&self, query: &HistoryQuery) -> Result<Vec<HistoryItem>, ChatError> {
        const OPERATION: &str = "load chat history";
        let mut params: Vec<(&str, String)> = vec![("limit", query.effective_limit().to_string())];
        if let Some(q) = query.q.as_deref().filter(|q| !q.trim().is_empty()) {
            params.push(("q", q.to_string()));
        }
        if query.range != DateRange::All {
            params.push(("range", query.range.as_str().to_string()));
        }
        if let Some(agent_id) = query.agent_id.as_deref() {
            params.push(("agentId", agent_id.to_string()));
        }

        let response = self
            .authorized(self.http.get(self.endpoint("api/history")))
            .query(&params)
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

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

struct LoadingGuard<'a>(&'a AtomicBool);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Non-success responses carry an [`ErrorBody`]; its message is kept as the
/// error body when present.
async fn ensure_success(operation: &str, response: Response) -> Result<Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let raw = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<ErrorBody>(&raw)
        .map(|body| body.error)
        .unwrap_or(raw);
    Err(ChatError::Upstream {
        operation: operation.to_string(),
        status: status.as_u16(),
        body,
    })
}

fn transport_error(operation: &str, err: reqwest::Error) -> ChatError {
    ChatError::Transport {
        operation: operation.to_string(),
        message: err.to_string(),
    }
}
