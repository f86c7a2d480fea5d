//! Caller sessions.
//!
//! Every caller gets a session resolved from a cookie. Values are
//! string-keyed JSON documents; mutations are staged in the session and
//! flushed by `save`. The challenge store reaches a session only through the
//! [`SessionAccess`] trait, so the in-process registry here can be swapped
//! for a real backend without touching the store.

pub mod token;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::Response,
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use portcullis_common::PortcullisError;
use rand::Rng;
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};
use tokio::time::Instant;

use crate::state::AppState;

/// Key-value session operations, as the challenge store needs them.
///
/// `get`/`set`/`delete` work on staged state; `save` flushes staged
/// mutations to whatever persists the session.
pub trait SessionAccess: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn delete(&self, key: &str);
    fn save(&self) -> Result<(), PortcullisError>;
}

/// An in-process session: a JSON document map plus a dirty flag.
pub struct Session {
    id: String,
    values: StdMutex<HashMap<String, Value>>,
    dirty: AtomicBool,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values: StdMutex::new(HashMap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// True when there are staged mutations not yet flushed by `save`
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionAccess for Session {
    fn get(&self, key: &str) -> Option<Value> {
        self.values().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.values().insert(key.to_string(), value);
        self.dirty.store(true, Ordering::Relaxed);
    }

    fn delete(&self, key: &str) {
        self.values().remove(key);
        self.dirty.store(true, Ordering::Relaxed);
    }

    fn save(&self) -> Result<(), PortcullisError> {
        // In-process sessions persist by construction; a real backend would
        // write the staged document out here.
        self.dirty.store(false, Ordering::Relaxed);
        Ok(())
    }
}

struct RegistryEntry {
    session: Arc<Session>,
    last_seen: Instant,
}

/// Session registry: cookie session id -> live session.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, RegistryEntry>>,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Mint a fresh unguessable session id
    pub fn new_session_id() -> String {
        let mut bytes = [0u8; 32];
        rand::rng().fill(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Resolve `sid`, creating the session on first sight. Refreshes the
    /// session's last-seen time.
    pub async fn get_or_create(&self, sid: &str) -> Arc<Session> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .entry(sid.to_string())
            .or_insert_with(|| RegistryEntry {
                session: Arc::new(Session::new(sid)),
                last_seen: Instant::now(),
            });
        entry.last_seen = Instant::now();
        entry.session.clone()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop sessions idle for longer than the timeout; zero disables pruning.
    pub async fn prune_idle(&self) -> usize {
        if self.idle_timeout.is_zero() {
            return 0;
        }
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| now.duration_since(entry.last_seen) <= self.idle_timeout);
        before - sessions.len()
    }
}

/// Background worker that prunes idle sessions
pub async fn idle_worker(
    registry: Arc<SessionRegistry>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    if period.is_zero() {
        tracing::warn!("session pruning disabled (prune interval 0)");
        return;
    }

    tracing::info!(period_secs = period.as_secs(), "session idle worker started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {
                let pruned = registry.prune_idle().await;
                if pruned > 0 {
                    tracing::debug!(pruned, "pruned idle sessions");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("session idle worker shutting down");
                break;
            }
        }
    }
}

/// Middleware: resolve the caller's session from the cookie (minting a new
/// id when absent), expose it via request extensions, and set the cookie on
/// responses for newly minted sessions.
pub async fn attach_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let cookie_name = state.config.session.cookie_name.clone();

    let sid = request
        .headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.to_string());

    let (sid, minted) = match sid {
        Some(sid) if !sid.is_empty() => (sid, false),
        _ => (SessionRegistry::new_session_id(), true),
    };

    let session = state.sessions.get_or_create(&sid).await;
    request.extensions_mut().insert(session);

    let mut response = next.run(request).await;

    if minted {
        let cookie = format!("{cookie_name}={sid}; Path=/; HttpOnly; SameSite=Lax");
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }

    response
}
