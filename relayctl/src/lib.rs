//! # relayctl: Metering relay for LLM inference
//!
//! `relayctl` sits between API clients and a set of upstream LLM providers. Every inference
//! request is authenticated, counted against a per-level request quota, charged against the
//! caller's prepaid credit balance and then relayed byte for byte to a provider channel that
//! serves the requested model.
//!
//! ## Overview
//!
//! Clients speak the provider formats they already use (OpenAI chat completions, Anthropic
//! messages, Gemini generate-content) and point them at the gateway with a per-user API key.
//! Operators define which channels serve which models, what each model costs in credits and
//! how many requests each user level may make per window. The gateway guarantees that credits
//! are charged exactly once for a served request and refunded for a failed one, including
//! under concurrent requests from the same user and process crashes mid-request.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for the HTTP layer,
//! PostgreSQL for the ledger, rules and channels, and Redis for the shared quota counters.
//!
//! ### Request Flow
//!
//! A relay request (`/v1/chat/completions`, `/v1/messages`, `/v1beta/models/*`) passes
//! through the admission pipeline in [`relay::handlers`]:
//!
//! 1. The [`auth`] middleware resolves the API key to a user id, role and level.
//! 2. The model name is read from the body or, for Gemini-style routes, the URL.
//! 3. The [`quota`] limiter increments the caller's fixed-window counter and may deny with
//!    429. Counter store outages fail open.
//! 4. The [`cost`] resolver picks the model's credit cost by longest-prefix match.
//! 5. The [`ledger`] reserves the cost with a single conditional decrement, or denies with
//!    402. Ledger failures fail closed.
//! 6. The [`relay`] router picks the first enabled channel listing the model and the proxy
//!    forwards the request with the channel's credential.
//! 7. A 2xx response commits the reservation once the body has been streamed; anything else
//!    reverts it and records a refund row. An [`audit`] record is written either way.
//!
//! ### Core Components
//!
//! The **ledger** ([`ledger`]) owns balances and the append-only transaction log. Reservations
//! are persisted as `reserved` rows so that a crash between reserve and finalize leaves an
//! inspectable record; the [`ledger::ReservationSweeper`] background task refunds any that
//! outlive the maximum request duration.
//!
//! The **catalog** ([`catalog`]) is a read-only view of credit rules, quota rules and
//! channels. The **database layer** ([`db`]) holds the PostgreSQL repositories behind the
//! ledger, catalog and audit implementations.
//!
//! Every component is reached through a trait object held in [`AppState`], with PostgreSQL /
//! Redis implementations for production and in-memory ones for tests.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use relayctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = relayctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     relayctl::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod audit;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod cost;
pub mod db;
pub mod errors;
pub mod ledger;
pub mod metrics;
pub mod quota;
pub mod relay;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use crate::{
    audit::{AuditSink, PostgresAuditSink},
    auth::{ApiKeyIdentity, IdentityResolver, PostgresUserDirectory},
    catalog::{Catalog, PostgresCatalog},
    ledger::{Ledger, PostgresLedger, ReservationSweeper},
    quota::{CounterStore, QuotaLimiter, RedisCounterStore},
    relay::{ChannelRouter, RelayProxy},
};
use axum::{Json, Router, middleware::from_fn_with_state, routing::get};
use bon::Builder;
pub use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info, instrument, warn};

pub use types::{ChannelId, TransactionId, UserId};

/// Application state shared across all request handlers.
///
/// # Fields
///
/// - `config`: Application configuration loaded from environment/files
/// - `ledger`: Credit balances and the transaction log
/// - `catalog`: Credit rules, quota rules and channels
/// - `quota`: Fixed-window quota limiter
/// - `router` / `proxy`: Channel selection and upstream forwarding
/// - `identity`: Resolves API keys to users
/// - `audit`: Best-effort relay audit log
/// - `metrics_handle`: Prometheus handle (when metrics are enabled)
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .ledger(ledger)
///     .catalog(catalog)
///     .quota(quota)
///     .router(router)
///     .proxy(proxy)
///     .identity(identity)
///     .audit(audit)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub ledger: Arc<dyn Ledger>,
    pub catalog: Arc<dyn Catalog>,
    pub quota: Arc<QuotaLimiter>,
    pub router: Arc<ChannelRouter>,
    pub proxy: Arc<RelayProxy>,
    pub identity: Arc<dyn IdentityResolver>,
    pub audit: Arc<dyn AuditSink>,
    pub metrics_handle: Option<PrometheusHandle>,
}

/// Get the relayctl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Connect to PostgreSQL with the configured pool settings and run migrations.
async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let settings = &config.database.pool;
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .idle_timeout(settings.idle_timeout())
        .max_lifetime(settings.max_lifetime())
        .connect(&config.database.url)
        .await?;

    migrator().run(&pool).await?;
    Ok(pool)
}

/// Wire the production implementations of every pipeline component.
fn build_state(config: Config, pool: PgPool) -> anyhow::Result<AppState> {
    let catalog: Arc<dyn Catalog> = Arc::new(PostgresCatalog::new(pool.clone()));

    let counters: Option<Arc<dyn CounterStore>> = match config.redis.url.as_deref() {
        Some(url) => {
            let store = RedisCounterStore::new(url)?
                .with_prefix(config.redis.key_prefix.clone())
                .with_timeout(config.redis.timeout);
            Some(Arc::new(store))
        }
        None => {
            warn!("No redis.url configured: request quotas are not enforced");
            None
        }
    };

    let metrics_handle = if config.enable_metrics {
        Some(metrics::get_or_install_prometheus_handle()?)
    } else {
        None
    };

    Ok(AppState::builder()
        .ledger(Arc::new(PostgresLedger::new(pool.clone())))
        .quota(Arc::new(QuotaLimiter::new(catalog.clone(), counters, &config.quota)))
        .router(Arc::new(ChannelRouter::new(catalog.clone())))
        .proxy(Arc::new(RelayProxy::new(&config.relay)?))
        .identity(Arc::new(ApiKeyIdentity::new(
            Arc::new(PostgresUserDirectory::new(pool.clone())),
            config.auth.api_key_prefix.clone(),
        )))
        .audit(Arc::new(PostgresAuditSink::new(pool)))
        .catalog(catalog)
        .maybe_metrics_handle(metrics_handle)
        .config(config)
        .build())
}

/// Build the application router.
///
/// - `GET /healthz` (unauthenticated)
/// - Relay routes and `/me*` behind API key authentication
/// - `GET /internal/metrics` when metrics are enabled
/// - A tracing layer producing one span per request
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> Router {
    let authenticated = relay::routes(state.config.relay.max_request_body_bytes)
        .route("/me", get(api::handlers::users::get_me))
        .route("/me/credit_transactions", get(api::handlers::transactions::list_my_transactions))
        .route_layer(from_fn_with_state(state.clone(), auth::middleware::require_user));

    let mut router = Router::new()
        .route("/healthz", get(|| async { Json(json!({ "status": "ok" })) }))
        .merge(authenticated);

    if let Some(handle) = state.metrics_handle.clone() {
        router = router.route(
            "/internal/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
    }

    router.with_state(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

/// Container for background services and their lifecycle management.
///
/// Currently this is the reservation sweeper. When dropped, the `drop_guard` cancels the
/// shutdown token, signaling all tasks to stop.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

fn setup_background_services(ledger: Arc<dyn Ledger>, config: &Config, shutdown_token: CancellationToken) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    if config.reservations.sweep_enabled {
        let sweeper = ReservationSweeper::new(ledger, &config.reservations);
        background_tasks.push(tokio::spawn(sweeper.run(shutdown_token.clone())));
    } else {
        info!("Reservation sweeper disabled by configuration");
    }

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// Main application struct that owns all resources and lifecycle.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] connects to the database, runs migrations, wires the
///    pipeline components and starts background services
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: When the shutdown signal is received, gracefully stops all services
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting relay with configuration: {:#?}", config);

        let pool = setup_database(&config).await?;
        let state = build_state(config.clone(), pool.clone())?;
        let bg_services = setup_background_services(state.ledger.clone(), &config, CancellationToken::new());
        let router = build_router(state);

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("Relay listening on http://{}", bind_addr);

        axum::serve(listener, self.router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{TestApp, create_test_config};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_metrics_endpoint_only_when_enabled() {
        let app = TestApp::new();
        app.server.get("/internal/metrics").await.assert_status(StatusCode::NOT_FOUND);

        let app = TestApp::with_config(crate::Config {
            enable_metrics: true,
            ..create_test_config()
        });
        let (_, key) = app.create_user("alice", 1, 0);
        app.server.get("/me").authorization_bearer(&key).await.assert_status_ok();
        crate::metrics::record_request("relayed");

        let response = app.server.get("/internal/metrics").await;
        response.assert_status_ok();
        assert!(response.text().contains("relay_requests_total"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404_not_401() {
        let app = TestApp::new();
        app.server.get("/v2/unknown").await.assert_status(StatusCode::NOT_FOUND);
    }
}
