//! HTTP surface for the memstress service
//!
//! Three plain-text handlers drive the allocator and store, plus the
//! Prometheus exposition route. Every response carries a fresh usage line;
//! internal allocation failures never surface to the caller.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, anyhow};
use axum::{Router, extract::State, routing::get};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::allocator::Allocator;
use crate::config::MemStressConfig;
use crate::metrics;
use crate::store::MemoryStore;
use crate::usage::{JemallocUsage, UsageProbe};

/// Shared application state passed to every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub allocator: Arc<Allocator>,
    pub usage: Arc<dyn UsageProbe>,
}

impl AppState {
    /// Build the state tree from configuration
    #[must_use]
    pub fn new(config: &MemStressConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let usage: Arc<dyn UsageProbe> = Arc::new(JemallocUsage);
        let allocator = Arc::new(Allocator::new(
            Arc::clone(&store),
            Arc::clone(&usage),
            &config.alloc,
        ));
        Self {
            store,
            allocator,
            usage,
        }
    }
}

/// Build the application router with all routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/consumemem", get(consume))
        .route("/clearmem", get(clear))
        .route("/metrics", get(metrics_export))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn status(State(state): State<AppState>) -> String {
    let started = Instant::now();
    let body = format!(
        "Hello user. Current memory usage:\n{}\n",
        usage_line(state.usage.as_ref())
    );
    metrics::record_request("status", started);
    body
}

async fn consume(State(state): State<AppState>) -> String {
    let started = Instant::now();
    state.allocator.run().await;
    let body = format!(
        "Hello user. Current memory usage:\n{}\n",
        usage_line(state.usage.as_ref())
    );
    metrics::record_request("consume", started);
    body
}

async fn clear(State(state): State<AppState>) -> String {
    let started = Instant::now();
    state.store.release_all().await;
    let body = format!(
        "Memory has been cleared.\n{}\n",
        usage_line(state.usage.as_ref())
    );
    metrics::record_request("clear", started);
    body
}

async fn metrics_export() -> String {
    let started = Instant::now();
    let body = metrics::encode();
    metrics::record_request("metrics", started);
    body
}

fn usage_line(usage: &dyn UsageProbe) -> String {
    match usage.snapshot() {
        Ok(snapshot) => snapshot.render(),
        Err(e) => {
            error!("failed to read memory statistics: {}", e);
            "memory statistics unavailable".to_string()
        }
    }
}

/// Memstress HTTP server
pub struct MemStressServer {
    config: MemStressConfig,
    state: AppState,
}

impl MemStressServer {
    /// Create a new server with its state tree
    #[must_use]
    pub fn new(config: MemStressConfig) -> Self {
        let state = AppState::new(&config);
        Self { config, state }
    }

    /// Handle to the shared state, for wiring the recorder and the
    /// shutdown path to the same store and probe.
    #[must_use]
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Bind and serve until `shutdown` resolves
    pub async fn start(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr: SocketAddr = self.config.server_address().parse().map_err(|e| {
            anyhow!(
                "invalid listen address '{}': {}",
                self.config.server_address(),
                e
            )
        })?;

        let app = router(self.state);

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("failed to bind to {}: {}", addr, e);
                return Err(e.into());
            }
        };
        info!("listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow!("server error: {}", e))
    }
}

/// API route documentation
pub fn print_routes() {
    println!("memstress routes:");
    println!("  GET /            - greeting + current memory usage");
    println!("  GET /consumemem  - allocate one batch (subject to ceiling)");
    println!("  GET /clearmem    - release all held memory");
    println!("  GET /metrics     - Prometheus metrics");
}
