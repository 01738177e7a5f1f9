//! Test server harness for HTTP tests
//!
//! Provides `TestLiveServer`, a real live service bound to a random local
//! port and backed by the in-memory session store.

use crate::tokens::{TEST_AUTH_SECRET, TEST_INVITE_SECRET};
use live_service::config::Config;
use live_service::repositories::{InMemorySessionStore, SessionStore};
use live_service::routes::{self, AppState};
use live_service::services::{SourceCatalog, StaticSourceCatalog};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Configuration used by every harness: fixed secrets, default TTLs.
pub fn test_config() -> Config {
    test_config_with(&[])
}

/// [`test_config`] with some variables overridden.
pub fn test_config_with(overrides: &[(&str, &str)]) -> Config {
    let mut vars = HashMap::from([
        (
            "DATABASE_URL".to_string(),
            "postgresql://test/test".to_string(),
        ),
        ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("AUTH_JWT_SECRET".to_string(), TEST_AUTH_SECRET.to_string()),
        (
            "INVITE_SIGNING_SECRET".to_string(),
            TEST_INVITE_SECRET.to_string(),
        ),
        ("LIVE_INSTANCE_ID".to_string(), "live-test".to_string()),
    ]);
    for (key, value) in overrides {
        vars.insert((*key).to_string(), (*value).to_string());
    }

    Config::from_vars(&vars).expect("test configuration should be valid")
}

/// Test harness for spawning the live service in HTTP tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health() -> Result<(), anyhow::Error> {
///     let server = TestLiveServer::spawn().await?;
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestLiveServer {
    addr: SocketAddr,
    store: Arc<InMemorySessionStore>,
    state: Arc<AppState>,
    _handle: JoinHandle<()>,
}

impl TestLiveServer {
    /// Spawn a server whose catalogue accepts every well-shaped source.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_catalog(Arc::new(StaticSourceCatalog::accepting())).await
    }

    /// Spawn a server with a specific source catalogue.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn_with_catalog(
        catalog: Arc<dyn SourceCatalog>,
    ) -> Result<Self, anyhow::Error> {
        let config = test_config();
        let store = Arc::new(InMemorySessionStore::new());
        let dyn_store: Arc<dyn SessionStore> = store.clone();

        let state = Arc::new(AppState::new(config, dyn_store, catalog));

        // A recorder that is never installed globally, so many servers can
        // coexist in one test binary.
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();

        let app = routes::build_routes(Arc::clone(&state), metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            store,
            state,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.state.config
    }

    /// The backing store, for seeding and for simulating outages.
    pub fn store(&self) -> &Arc<InMemorySessionStore> {
        &self.store
    }

    /// The application state the server runs with.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }
}

impl Drop for TestLiveServer {
    fn drop(&mut self) {
        self._handle.abort();
        self.state.coordinator.cancel();
    }
}
