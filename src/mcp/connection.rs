//! Connection manager: per-server sessions, staleness, circuit breaking,
//! and coalesced reconnection.
//!
//! The connection and breaker tables are guarded by sync mutexes that
//! are never held across an await point; the reconnect itself runs
//! outside any lock and its result is shared with all coalesced waiters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::{BreakerConfig, ServerConfig};

use super::breaker::CircuitBreaker;
use super::singleflight::Singleflight;
use super::{SessionFactory, ToolError, ToolSession};

/// A live connection table entry.
struct Connection {
    session: Arc<dyn ToolSession>,
    /// Set by [`ConnectionManager::mark_stale`]; forces the next acquire
    /// to reconnect even though the session looks usable.
    stale: bool,
}

/// Owns connection state for every configured remote server.
///
/// Explicitly constructed and closed; multiple independent instances can
/// coexist (there is no process-wide state).
pub struct ConnectionManager {
    servers: HashMap<String, ServerConfig>,
    factory: Arc<dyn SessionFactory>,
    breaker_config: BreakerConfig,
    table: Mutex<HashMap<String, Connection>>,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    reconnects: Singleflight<Result<Arc<dyn ToolSession>, ToolError>>,
}

impl ConnectionManager {
    pub fn new(
        servers: Vec<ServerConfig>,
        factory: Arc<dyn SessionFactory>,
        breaker_config: BreakerConfig,
    ) -> Self {
        Self {
            servers: servers.into_iter().map(|s| (s.name.clone(), s)).collect(),
            factory,
            breaker_config,
            table: Mutex::new(HashMap::new()),
            breakers: Mutex::new(HashMap::new()),
            reconnects: Singleflight::new(),
        }
    }

    /// Acquire a usable session for `server_name`.
    ///
    /// Fails immediately with [`ToolError::CircuitOpen`] (carrying the
    /// remaining wait) when the breaker is open; no network attempt is
    /// made. Returns the existing session if it is live and not stale;
    /// otherwise reconnects, with concurrent callers for the same server
    /// coalescing onto a single attempt.
    pub async fn acquire(&self, server_name: &str) -> Result<Arc<dyn ToolSession>, ToolError> {
        let server = self
            .servers
            .get(server_name)
            .ok_or_else(|| ToolError::UnknownServer(server_name.to_string()))?;

        self.check_breaker(server_name)?;

        if let Some(session) = self.live_session(server_name) {
            return Ok(session);
        }

        let (result, led) = self
            .reconnects
            .run(server_name, || self.reconnect(server))
            .await;
        if !led {
            debug!(server = server_name, "joined in-flight reconnect");
        }
        result
    }

    /// Force the next `acquire` for this server to reconnect.
    ///
    /// Called by the invoker after a tool-call failure, since the
    /// session may be wedged even though the transport looks alive.
    pub fn mark_stale(&self, server_name: &str) {
        let mut table = self.table.lock().expect("connection table poisoned");
        if let Some(conn) = table.get_mut(server_name) {
            conn.stale = true;
            debug!(server = server_name, "connection marked stale");
        }
    }

    /// Tear down all sessions.
    pub fn close(&self) {
        self.table.lock().expect("connection table poisoned").clear();
    }

    /// Whether the breaker for `server_name` is currently open.
    pub fn breaker_open(&self, server_name: &str) -> bool {
        self.breakers
            .lock()
            .expect("breaker table poisoned")
            .get(server_name)
            .is_some_and(|b| b.is_open(Instant::now()))
    }

    fn check_breaker(&self, server_name: &str) -> Result<(), ToolError> {
        let breakers = self.breakers.lock().expect("breaker table poisoned");
        if let Some(breaker) = breakers.get(server_name) {
            if let Err(retry_in) = breaker.check(Instant::now()) {
                return Err(ToolError::CircuitOpen {
                    server: server_name.to_string(),
                    retry_in,
                });
            }
        }
        Ok(())
    }

    fn live_session(&self, server_name: &str) -> Option<Arc<dyn ToolSession>> {
        let table = self.table.lock().expect("connection table poisoned");
        table
            .get(server_name)
            .filter(|conn| !conn.stale)
            .map(|conn| Arc::clone(&conn.session))
    }

    /// Establish a new session and atomically replace the stored one.
    ///
    /// Runs as the single-flight leader; the connect happens with no
    /// lock held. Success clears staleness and the breaker; failure
    /// increments the breaker's failure counter.
    async fn reconnect(&self, server: &ServerConfig) -> Result<Arc<dyn ToolSession>, ToolError> {
        debug!(server = %server.name, endpoint = %server.endpoint, "reconnecting");
        match self.factory.connect(server).await {
            Ok(session) => {
                let mut table = self.table.lock().expect("connection table poisoned");
                table.insert(
                    server.name.clone(),
                    Connection { session: Arc::clone(&session), stale: false },
                );
                drop(table);
                self.breakers
                    .lock()
                    .expect("breaker table poisoned")
                    .entry(server.name.clone())
                    .or_insert_with(|| CircuitBreaker::new(&self.breaker_config))
                    .record_success();
                Ok(session)
            }
            Err(err) => {
                let mut breakers = self.breakers.lock().expect("breaker table poisoned");
                let breaker = breakers
                    .entry(server.name.clone())
                    .or_insert_with(|| CircuitBreaker::new(&self.breaker_config));
                breaker.record_failure(Instant::now());
                warn!(
                    server = %server.name,
                    failures = breaker.failures(),
                    error = %err,
                    "reconnect failed"
                );
                Err(err)
            }
        }
    }
}
