mod handlers;
mod router;

pub use router::build_api_router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::daemon::DaemonService;
use crate::core::lifecycle::LifecycleComponent;

pub struct ApiServerConfig {
    pub service: Arc<DaemonService>,
    pub log_tx: tokio::sync::broadcast::Sender<String>,
    /// Cancelled by `POST /api/daemon/stop`; the process owner listens on it.
    pub stop: CancellationToken,
    pub api_host: String,
    pub api_port: u16,
}

pub struct ApiServer {
    config: ApiServerConfig,
    drain: CancellationToken,
    handle: Option<tokio::task::JoinHandle<()>>,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) service: Arc<DaemonService>,
    pub(crate) log_tx: tokio::sync::broadcast::Sender<String>,
    pub(crate) stop: CancellationToken,
    pub(crate) api_port: u16,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            config,
            drain: CancellationToken::new(),
            handle: None,
        }
    }
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(line) => Ok(Event::default().data(line.trim_end())),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream)
}

// --- Lifecycle Implementations ---

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server Interface initializing...");
        Ok(())
    }

    /// Binds before returning so a taken port fails startup.
    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.config.api_host, self.config.api_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("cannot bind API server to {}", addr))?;

        let state = AppState {
            service: self.config.service.clone(),
            log_tx: self.config.log_tx.clone(),
            stop: self.config.stop.clone(),
            api_port: self.config.api_port,
        };
        let app = build_api_router(state);
        let drain = self.drain.clone();

        info!("API Server running at http://{addr}");
        self.handle = Some(tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { drain.cancelled().await });
            if let Err(e) = serve.await {
                tracing::error!("API Server crashed: {}", e);
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server Interface shutting down...");
        self.drain.cancel();
        if let Some(handle) = self.handle.take() {
            // Open SSE streams never finish on their own.
            let _ = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
        }
        Ok(())
    }
}
