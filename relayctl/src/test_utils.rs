//! In-process test harness: the full router over in-memory ledger, catalog, counters and audit.

use crate::{
    AppState, build_router,
    audit::InMemoryAuditSink,
    auth::{ApiKeyIdentity, api_key::hash_api_key},
    catalog::InMemoryCatalog,
    config::Config,
    db::models::users::User,
    ledger::InMemoryLedger,
    quota::{InMemoryCounterStore, QuotaLimiter},
    relay::{ChannelRouter, RelayProxy},
    types::Level,
};
use axum_test::TestServer;
use std::sync::Arc;
use std::time::Duration;

pub struct TestApp {
    pub server: TestServer,
    pub ledger: Arc<InMemoryLedger>,
    pub catalog: Arc<InMemoryCatalog>,
    pub counters: Arc<InMemoryCounterStore>,
    pub audit: Arc<InMemoryAuditSink>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(create_test_config())
    }

    pub fn with_config(config: Config) -> Self {
        Self::build(config, false)
    }

    /// Serve over a real TCP socket, so response bodies stream through hyper.
    pub fn with_http_transport() -> Self {
        Self::build(create_test_config(), true)
    }

    fn build(config: Config, http_transport: bool) -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let counters = Arc::new(InMemoryCounterStore::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let metrics_handle = config
            .enable_metrics
            .then(|| crate::metrics::get_or_install_prometheus_handle().expect("Failed to install metrics recorder"));

        let state = AppState::builder()
            .ledger(ledger.clone())
            .catalog(catalog.clone())
            .quota(Arc::new(QuotaLimiter::new(catalog.clone(), Some(counters.clone()), &config.quota)))
            .router(Arc::new(ChannelRouter::new(catalog.clone())))
            .proxy(Arc::new(RelayProxy::new(&config.relay).expect("Failed to build upstream client")))
            .identity(Arc::new(ApiKeyIdentity::new(ledger.clone(), config.auth.api_key_prefix.clone())))
            .audit(audit.clone())
            .maybe_metrics_handle(metrics_handle)
            .config(config)
            .build();

        let router = build_router(state);
        let server = if http_transport {
            TestServer::builder().http_transport().build(router)
        } else {
            TestServer::new(router)
        }
        .expect("Failed to create test server");

        Self {
            server,
            ledger,
            catalog,
            counters,
            audit,
        }
    }

    /// Create a user whose API key is `sk-{username}`.
    pub fn create_user(&self, username: &str, level: Level, credits: i64) -> (User, String) {
        let key = format!("sk-{username}");
        let user = self.ledger.insert_user(username, level, credits, Some(hash_api_key(&key)));
        (user, key)
    }

    /// Wait for fire-and-forget audit records to land.
    pub async fn wait_for_audit(&self, count: usize) -> Vec<crate::db::models::api_logs::ApiLogEntry> {
        for _ in 0..100 {
            let entries = self.audit.entries();
            if entries.len() >= count {
                return entries;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.audit.entries()
    }
}

pub fn create_test_config() -> Config {
    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        enable_metrics: false,
        ..Config::default()
    };
    config.reservations.sweep_enabled = false;
    config.relay.upstream_timeout = Duration::from_secs(5);
    config.relay.connect_timeout = Duration::from_secs(1);
    config
}
