use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use agent_chat_error::ChatError;
use agent_chat_upstream::config::{
    AGENT_ID_ENV, API_KEY_ENV, API_URL_ENV, DEFAULT_API_URL,
};
use agent_chat_upstream::{format_relative, AgentClient, UpstreamConfig};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::client::{ChatClient, SubmitOutcome};
use crate::gate::AuthConfig;
use crate::history::{DateRange, HistoryQuery};
use crate::router::{build_router_with_state, AppState};

pub const ACCESS_TOKEN_ENV: &str = "AGENT_CHAT_ACCESS_TOKEN";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:3000";
const ENV_FILES: &[&str] = &[".env.local", ".env"];
const CORS_ORIGINS_ENV: &str = "AGENT_CHAT_CORS_ORIGINS";
const CORS_MAX_AGE: Duration = Duration::from_secs(600);

#[derive(Parser, Debug)]
#[command(name = "agent-chat", bin_name = "agent-chat")]
#[command(about = "Chat relay for hosted agent APIs", version)]
#[command(arg_required_else_help = true)]
pub struct AgentChatCli {
    #[command(subcommand)]
    command: Command,

    /// Shared access token required by (server) or sent to (chat, history) the API.
    #[arg(long, short = 't', global = true, env = ACCESS_TOKEN_ENV, hide_env_values = true)]
    token: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat relay HTTP server.
    Server(ServerArgs),
    /// Chat with the agent from the terminal.
    Chat(ClientArgs),
    /// List past chats.
    History(HistoryArgs),
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    #[arg(long, short = 'H', default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long, env = API_URL_ENV, default_value = DEFAULT_API_URL)]
    api_url: String,

    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = AGENT_ID_ENV)]
    agent_id: Option<String>,

    /// Upstream connect timeout in milliseconds.
    #[arg(long)]
    upstream_connect_timeout_ms: Option<u64>,

    /// Browser origins allowed to call the API, e.g. the chat UI's dev server.
    /// Cross-origin requests are refused when none are given.
    #[arg(long = "cors-origin", short = 'O', env = CORS_ORIGINS_ENV, value_delimiter = ',')]
    cors_origins: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Base URL of a running agent-chat server.
    #[arg(long, short = 'e', default_value = DEFAULT_ENDPOINT)]
    endpoint: String,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    #[command(flatten)]
    client: ClientArgs,

    #[arg(long)]
    limit: Option<usize>,

    /// Case-insensitive match against each chat's first message.
    #[arg(long, short = 'q')]
    search: Option<String>,

    #[arg(long, value_enum, default_value_t = DateRange::All)]
    range: DateRange,

    #[arg(long)]
    agent_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid cors origin: {0}")]
    InvalidCorsOrigin(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error("server error: {0}")]
    Server(String),
}

pub async fn run_agent_chat() -> Result<(), CliError> {
    let loaded = load_env_files();
    let cli = AgentChatCli::parse();
    init_logging();
    for path in loaded {
        tracing::debug!(path = %path, "loaded environment file");
    }
    run_command(cli).await
}

/// Earlier files win: variables already set are never overwritten.
fn load_env_files() -> Vec<String> {
    ENV_FILES
        .iter()
        .filter_map(|name| {
            dotenvy::from_filename(name)
                .ok()
                .map(|path| path.display().to_string())
        })
        .collect()
}

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_logfmt::builder()
                .layer()
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn run_command(cli: AgentChatCli) -> Result<(), CliError> {
    let AgentChatCli { command, token } = cli;
    match &command {
        Command::Server(args) => run_server(args, token).await,
        Command::Chat(args) => run_chat(args, token).await,
        Command::History(args) => run_history(args, token).await,
    }
}

async fn run_server(server: &ServerArgs, token: Option<String>) -> Result<(), CliError> {
    let auth = match token.filter(|token| !token.is_empty()) {
        Some(token) => AuthConfig::with_token(token),
        None => AuthConfig::disabled(),
    };

    let mut upstream = UpstreamConfig::new(&server.api_url);
    if let Some(api_key) = &server.api_key {
        upstream = upstream.with_api_key(api_key);
    }
    if let Some(agent_id) = &server.agent_id {
        upstream = upstream.with_agent_id(agent_id);
    }
    if let Some(ms) = server.upstream_connect_timeout_ms {
        upstream = upstream.with_connect_timeout(Duration::from_millis(ms));
    }
    if !upstream.has_api_key() {
        tracing::warn!("{API_KEY_ENV} is not set; chat requests will fail until it is configured");
    }
    tracing::info!(
        api_url = %upstream.api_url,
        agent_id = ?upstream.agent_id,
        has_api_key = upstream.has_api_key(),
        gate_enabled = auth.is_enabled(),
        "upstream configured"
    );

    let state = Arc::new(AppState::new(auth, AgentClient::new(upstream)?));
    let (mut router, _state) = build_router_with_state(state);
    if let Some(cors) = build_cors_layer(&server.cors_origins)? {
        router = router.layer(cors);
    }

    crate::serve(&server.host, server.port, router)
        .await
        .map_err(|err| CliError::Server(err.to_string()))
}

async fn run_chat(args: &ClientArgs, token: Option<String>) -> Result<(), CliError> {
    let client = ChatClient::new(&args.endpoint)?.with_access_token(token);
    write_stdout_line(&format!(
        "Connected to {}. Type a message, /new to start over, /quit to exit.",
        args.endpoint
    ))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    write_prompt()?;
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" | "/exit" => break,
            "/new" => {
                client.reset();
                write_stdout_line("Started a new chat.")?;
                write_prompt()?;
                continue;
            }
            _ => {}
        }

        let mut out = std::io::stdout();
        let result = client
            .submit(&line, |delta| {
                let _ = out.write_all(delta.as_bytes());
                let _ = out.flush();
            })
            .await;
        match result {
            Ok(SubmitOutcome::Completed {
                report,
                interrupted,
            }) => {
                if report.text.is_empty() {
                    write_stdout_line("(no reply)")?;
                } else {
                    write_stdout_line("")?;
                }
                if interrupted {
                    write_stderr_line("[reply interrupted]")?;
                }
            }
            Ok(SubmitOutcome::Ignored) | Ok(SubmitOutcome::Busy) => {}
            Err(err) => write_stderr_line(&format!("error: {err}"))?,
        }
        write_prompt()?;
    }
    Ok(())
}

async fn run_history(args: &HistoryArgs, token: Option<String>) -> Result<(), CliError> {
    let client = ChatClient::new(&args.client.endpoint)?.with_access_token(token);
    let query = HistoryQuery {
        limit: args.limit,
        q: args.search.clone(),
        range: args.range,
        agent_id: args.agent_id.clone(),
    };
    let items = client.history(&query).await?;
    if items.is_empty() {
        write_stdout_line("No chats found.")?;
        return Ok(());
    }

    let now = chrono::Utc::now();
    for item in items {
        let when = item
            .activity_at()
            .map(|at| format_relative(at, now))
            .unwrap_or_else(|| "-".to_string());
        write_stdout_line(&format!("{}\t{}\t{}", item.id, when, preview(&item.client_input())))?;
    }
    Ok(())
}

fn preview(text: &str) -> String {
    const MAX_CHARS: usize = 80;
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= MAX_CHARS {
        return single_line;
    }
    let truncated: String = single_line.chars().take(MAX_CHARS - 3).collect();
    format!("{truncated}...")
}

/// The browser UI only ever sends JSON `GET`/`POST` requests, with the access
/// token as a bearer header or cookie.
fn build_cors_layer(origins: &[String]) -> Result<Option<CorsLayer>, CliError> {
    let origins = origins
        .iter()
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .map(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|_| CliError::InvalidCorsOrigin(origin.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if origins.is_empty() {
        return Ok(None);
    }

    tracing::debug!(origins = origins.len(), "cross-origin requests enabled");
    Ok(Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([CONTENT_TYPE, AUTHORIZATION])
            .allow_credentials(true)
            .max_age(CORS_MAX_AGE),
    ))
}

fn write_prompt() -> Result<(), CliError> {
    let mut out = std::io::stdout();
    out.write_all(b"> ")?;
    out.flush()?;
    Ok(())
}

fn write_stdout_line(text: &str) -> Result<(), CliError> {
    let mut out = std::io::stdout();
    out.write_all(text.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

fn write_stderr_line(text: &str) -> Result<(), CliError> {
    let mut out = std::io::stderr();
    out.write_all(text.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        AgentChatCli::command().debug_assert();
    }

    #[test]
    fn parses_history_flags() {
        let cli = AgentChatCli::try_parse_from([
            "agent-chat",
            "history",
            "--range",
            "week",
            "-q",
            "sales",
            "--endpoint",
            "http://localhost:4000",
        ])
        .expect("parse");
        match cli.command {
            Command::History(args) => {
                assert_eq!(args.range, DateRange::Week);
                assert_eq!(args.search.as_deref(), Some("sales"));
                assert_eq!(args.client.endpoint, "http://localhost:4000");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    fn server_args(extra: &[&str]) -> ServerArgs {
        let mut argv = vec!["agent-chat", "server"];
        argv.extend_from_slice(extra);
        let cli = AgentChatCli::try_parse_from(argv).expect("parse");
        let Command::Server(args) = cli.command else {
            panic!("expected server command");
        };
        args
    }

    #[test]
    fn cors_is_off_without_origins() {
        let args = server_args(&[]);
        assert!(args.cors_origins.is_empty());
        assert!(build_cors_layer(&args.cors_origins).expect("layer").is_none());
    }

    #[test]
    fn rejects_bad_cors_origin() {
        let args = server_args(&["--cors-origin", "not a\nvalid origin"]);
        assert!(matches!(
            build_cors_layer(&args.cors_origins),
            Err(CliError::InvalidCorsOrigin(_))
        ));
    }

    #[tokio::test]
    async fn preflight_allows_configured_origin_with_credentials() {
        use axum::body::Body;
        use axum::http::{Request, StatusCode};
        use axum::routing::post;
        use tower::util::ServiceExt;

        let args = server_args(&["-O", "http://localhost:5173,http://ui.internal"]);
        assert_eq!(args.cors_origins.len(), 2);
        let cors = build_cors_layer(&args.cors_origins)
            .expect("layer")
            .expect("enabled");
        let app = axum::Router::new()
            .route("/api/chat", post(|| async { StatusCode::OK }))
            .layer(cors);

        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/chat")
            .header("origin", "http://ui.internal")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "http://ui.internal");
        assert_eq!(headers["access-control-allow-credentials"], "true");
        let methods = headers["access-control-allow-methods"]
            .to_str()
            .expect("methods");
        assert!(methods.contains("POST") && methods.contains("GET"));
        assert!(!methods.contains("DELETE"));
    }

    #[test]
    fn preview_collapses_and_truncates() {
        assert_eq!(preview("line one\n  line two"), "line one line two");
        let long = "x".repeat(120);
        let shown = preview(&long);
        assert_eq!(shown.chars().count(), 80);
        assert!(shown.ends_with("..."));
    }
}
