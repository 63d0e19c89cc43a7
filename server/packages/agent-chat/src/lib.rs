//! Chat relay for hosted agent APIs.
//!
//! The server side ([`router`]) creates and continues upstream chats and
//! relays reply streams to clients byte for byte ([`relay`]). The client
//! side ([`client`]) consumes those streams incrementally into a
//! conversation.

use std::net::SocketAddr;

use axum::Router;

pub mod cli;
pub mod client;
pub mod gate;
pub mod history;
pub mod relay;
pub mod router;

pub use client::{ChatClient, SubmitOutcome};
pub use gate::AuthConfig;
pub use history::{DateRange, HistoryQuery};
pub use router::{build_router, build_router_with_state, ApiError, AppState};

/// Binds `host:port` and serves `router` until ctrl-c.
pub async fn serve(
    host: &str,
    port: u16,
    router: Router,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    let addr: SocketAddr = listener.local_addr()?;
    tracing::info!(addr = %addr, "agent-chat listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down");
}
