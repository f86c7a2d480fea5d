//! Session-bound challenge store.
//!
//! Binds a short-lived challenge id to the session of the caller that
//! requested it, so the digits generated under one request can be written
//! into and read back from that caller's session without keeping the request
//! context itself reachable. Bindings are immutable once created and are
//! removed by a consuming read, by lazy expiry on read, or by the periodic
//! sweep worker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use portcullis_common::PortcullisError;
use portcullis_common::constants::session_keys;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::time::Instant;

use crate::session::SessionAccess;

/// Session key a challenge's digits live under: "identify_{id}".
/// The exact format matters: existing session data was written under it.
pub fn digits_key(id: &str) -> String {
    format!("{}_{}", session_keys::IDENTIFY_PREFIX, id)
}

/// One live binding. Immutable once inserted; only ever removed.
struct Binding {
    /// The owning session. Non-owning on purpose: the store must never
    /// extend a caller's session lifetime.
    owner: Weak<dyn SessionAccess>,
    created_at: Instant,
}

/// The store. Two independent lock domains: `index` (the id map, touched on
/// every sweep) and `session_lock` (serializes session value access).
/// Whenever both are held, the session lock is taken first.
pub struct ChallengeStore {
    index: RwLock<HashMap<String, Binding>>,
    session_lock: Mutex<()>,
    /// Binding lifetime; zero disables time expiry
    expire_period: Duration,
    /// Sweep cadence; zero disables the sweep worker
    gc_interval: Duration,
    /// Set once the sweep worker has been spawned
    worker_started: AtomicBool,
}

impl ChallengeStore {
    pub fn new(expire_period: Duration, gc_interval: Duration) -> Self {
        Self {
            index: RwLock::new(HashMap::new()),
            session_lock: Mutex::new(()),
            expire_period,
            gc_interval,
            worker_started: AtomicBool::new(false),
        }
    }

    /// Bind `id` to `owner`'s session. Fails when `id` is already live; the
    /// existing binding is left untouched and the caller should mint a new
    /// id and retry.
    pub async fn register(
        &self,
        owner: Weak<dyn SessionAccess>,
        id: &str,
    ) -> Result<(), PortcullisError> {
        let mut index = self.index.write().await;
        if index.contains_key(id) {
            return Err(PortcullisError::ChallengeExists(id.to_string()));
        }
        index.insert(
            id.to_string(),
            Binding {
                owner,
                created_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Drop the binding for `id`. Removing an absent id is a no-op:
    /// deletion is "ensure absent", not "must have existed".
    pub async fn remove(&self, id: &str) {
        self.index.write().await.remove(id);
    }

    /// Write `digits` into the owning session under [`digits_key`].
    ///
    /// An absent binding is a silent no-op: digits can legitimately arrive
    /// after the binding has expired and been swept.
    pub async fn set_digits(&self, id: &str, digits: &[u8]) {
        let _session_guard = self.session_lock.lock().await;

        let owner = {
            let index = self.index.read().await;
            match index.get(id) {
                Some(binding) => binding.owner.clone(),
                None => return,
            }
        };

        let Some(session) = owner.upgrade() else {
            tracing::debug!(challenge_id = %id, "owning session gone, dropping digits");
            return;
        };

        session.set(&digits_key(id), serde_json::json!(digits));
        if let Err(e) = session.save() {
            tracing::warn!(challenge_id = %id, error = %e, "session flush failed after storing digits");
        }
    }

    /// Read the digits stored for `id`.
    ///
    /// `consume` deletes the digits and the binding after the read, so the
    /// value is seen exactly once. An expired binding reads as absent and is
    /// cleaned up the same way. An id with no live binding reads as absent —
    /// "never existed" and "already consumed" are indistinguishable here.
    pub async fn get_digits(&self, id: &str, consume: bool) -> Option<Vec<u8>> {
        let (owner, created_at) = {
            let index = self.index.read().await;
            match index.get(id) {
                Some(binding) => (binding.owner.clone(), binding.created_at),
                None => {
                    tracing::debug!(challenge_id = %id, "challenge read: no live binding");
                    return None;
                }
            }
        };

        let overdue =
            !self.expire_period.is_zero() && Instant::now() > created_at + self.expire_period;

        if overdue || consume {
            // Session lock before index lock, always in this order.
            let _session_guard = self.session_lock.lock().await;

            let session = owner.upgrade();
            let digits = match &session {
                Some(session) if !overdue => session.get(&digits_key(id)).and_then(decode_digits),
                _ => None,
            };

            if let Some(session) = &session {
                session.delete(&digits_key(id));
                if let Err(e) = session.save() {
                    tracing::warn!(challenge_id = %id, error = %e, "session flush failed during challenge cleanup");
                }
            }

            self.index.write().await.remove(id);
            return digits;
        }

        match owner.upgrade() {
            Some(session) => session.get(&digits_key(id)).and_then(decode_digits),
            None => {
                tracing::debug!(challenge_id = %id, "owning session gone, reading as absent");
                None
            }
        }
    }

    /// Whether a live binding exists for `id`
    pub async fn contains(&self, id: &str) -> bool {
        self.index.read().await.contains_key(id)
    }

    /// Number of live bindings
    pub async fn live_count(&self) -> usize {
        self.index.read().await.len()
    }

    /// Evict every binding older than the expire period. Returns the number
    /// evicted. Session values are left alone: a swept id later read through
    /// [`Self::get_digits`] simply behaves as absent.
    pub async fn sweep_expired(&self) -> usize {
        if self.expire_period.is_zero() {
            return 0;
        }
        let now = Instant::now();

        let candidates: Vec<String> = {
            let index = self.index.read().await;
            index
                .iter()
                .filter(|(_, binding)| now > binding.created_at + self.expire_period)
                .map(|(id, _)| id.clone())
                .collect()
        };

        if candidates.is_empty() {
            return 0;
        }

        let mut removed = 0;
        let mut index = self.index.write().await;
        for id in candidates {
            // Re-check age: the id may have been consumed and re-registered
            // between the scan and this write lock.
            if let Some(binding) = index.get(&id) {
                if now > binding.created_at + self.expire_period {
                    index.remove(&id);
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Spawn the sweep worker. Single-flight: a second call is a logged
    /// no-op, as is a zero sweep cadence.
    pub fn spawn_expiry_worker(self: &Arc<Self>, shutdown: broadcast::Receiver<()>) {
        if self.gc_interval.is_zero() {
            tracing::warn!("sweep disabled (gc interval 0), expired bindings are reclaimed on read only");
            return;
        }
        if self.worker_started.swap(true, Ordering::SeqCst) {
            tracing::warn!("challenge expiry worker already running");
            return;
        }
        tokio::spawn(expiry_worker(Arc::clone(self), shutdown));
    }
}

/// Background worker that sweeps expired challenge bindings
pub async fn expiry_worker(store: Arc<ChallengeStore>, mut shutdown: broadcast::Receiver<()>) {
    tracing::info!(
        period_secs = store.gc_interval.as_secs(),
        "challenge expiry worker started"
    );

    loop {
        tokio::select! {
            _ = tokio::time::sleep(store.gc_interval) => {
                let removed = store.sweep_expired().await;
                if removed > 0 {
                    tracing::debug!(removed, "swept expired challenge bindings");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("challenge expiry worker shutting down");
                break;
            }
        }
    }
}

fn decode_digits(value: serde_json::Value) -> Option<Vec<u8>> {
    serde_json::from_value(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    fn store() -> ChallengeStore {
        ChallengeStore::new(Duration::from_secs(300), Duration::from_secs(60))
    }

    fn session(id: &str) -> Arc<Session> {
        Arc::new(Session::new(id))
    }

    #[test]
    fn digits_key_matches_session_namespace() {
        assert_eq!(digits_key("abc"), "identify_abc");
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected_and_keeps_first_owner() {
        let store = store();
        let first = session("s1");
        let second = session("s2");

        store.register(Arc::<Session>::downgrade(&first), "dup").await.unwrap();
        let err = store
            .register(Arc::<Session>::downgrade(&second), "dup")
            .await
            .unwrap_err();
        assert!(matches!(err, PortcullisError::ChallengeExists(_)));
        assert!(err.is_retryable());

        // Digits still land in the first session
        store.set_digits("dup", &[1, 2, 3]).await;
        assert!(first.get(&digits_key("dup")).is_some());
        assert!(second.get(&digits_key("dup")).is_none());
    }

    #[tokio::test]
    async fn unknown_id_reads_as_absent() {
        let store = store();
        assert_eq!(store.get_digits("ghost", false).await, None);
        assert_eq!(store.get_digits("ghost", true).await, None);
    }

    #[tokio::test]
    async fn non_consuming_read_is_idempotent() {
        let store = store();
        let sess = session("s1");
        store.register(Arc::<Session>::downgrade(&sess), "a").await.unwrap();
        store.set_digits("a", &[4, 2]).await;

        assert_eq!(store.get_digits("a", false).await, Some(vec![4, 2]));
        assert_eq!(store.get_digits("a", false).await, Some(vec![4, 2]));
        assert!(store.contains("a").await);
    }

    #[tokio::test]
    async fn consuming_read_yields_exactly_once() {
        let store = store();
        let sess = session("s1");
        store.register(Arc::<Session>::downgrade(&sess), "b").await.unwrap();
        store.set_digits("b", &[0, 9]).await;

        assert_eq!(store.get_digits("b", true).await, Some(vec![0, 9]));
        assert_eq!(store.get_digits("b", true).await, None);
        assert!(!store.contains("b").await);
        assert!(sess.get(&digits_key("b")).is_none());
    }

    #[tokio::test]
    async fn digits_for_a_swept_id_are_dropped_silently() {
        let store = store();
        store.set_digits("never-registered", &[1]).await;
        assert_eq!(store.get_digits("never-registered", false).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_binding_reads_empty_and_is_fully_removed() {
        let store = ChallengeStore::new(Duration::from_secs(1), Duration::from_secs(60));
        let sess = session("s1");
        store.register(Arc::<Session>::downgrade(&sess), "c").await.unwrap();
        store.set_digits("c", &[7, 7]).await;

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.get_digits("c", false).await, None);
        assert!(!store.contains("c").await);
        assert!(sess.get(&digits_key("c")).is_none());

        // Fully removed, so the id is registrable again
        store.register(Arc::<Session>::downgrade(&sess), "c").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_expire_period_never_expires() {
        let store = ChallengeStore::new(Duration::ZERO, Duration::from_secs(60));
        let sess = session("s1");
        store.register(Arc::<Session>::downgrade(&sess), "c").await.unwrap();
        store.set_digits("c", &[9]).await;

        tokio::time::advance(Duration::from_secs(10_000)).await;

        assert_eq!(store.sweep_expired().await, 0);
        assert_eq!(store.get_digits("c", false).await, Some(vec![9]));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_only_expired_bindings() {
        let store = ChallengeStore::new(Duration::from_secs(10), Duration::from_secs(60));
        let sess = session("s1");

        store.register(Arc::<Session>::downgrade(&sess), "old").await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        store.register(Arc::<Session>::downgrade(&sess), "young").await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(store.sweep_expired().await, 1);
        assert!(!store.contains("old").await);
        assert!(store.contains("young").await);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_converges_without_explicit_reads() {
        let store = Arc::new(ChallengeStore::new(
            Duration::from_secs(1),
            Duration::from_secs(1),
        ));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        store.spawn_expiry_worker(shutdown_rx);

        let sess = session("s1");
        store.register(Arc::<Session>::downgrade(&sess), "d").await.unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!store.contains("d").await);

        drop(shutdown_tx);
    }

    #[tokio::test]
    async fn worker_spawn_is_single_flight() {
        let store = Arc::new(store());
        let (shutdown_tx, _) = broadcast::channel(1);

        store.spawn_expiry_worker(shutdown_tx.subscribe());
        store.spawn_expiry_worker(shutdown_tx.subscribe());

        assert!(store.worker_started.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_distinct_registrations_all_succeed() {
        let store = Arc::new(store());
        let sess = session("s1");

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            let owner = Arc::<Session>::downgrade(&sess);
            tasks.spawn(async move { store.register(owner, &format!("id-{i}")).await });
        }

        let mut ok = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 32);
        assert_eq!(store.live_count().await, 32);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_same_id_has_exactly_one_winner() {
        let store = Arc::new(store());
        let sess = session("s1");

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let owner = Arc::<Session>::downgrade(&sess);
            tasks.spawn(async move { store.register(owner, "same").await });
        }

        let mut ok = 0;
        let mut duplicates = 0;
        while let Some(result) = tasks.join_next().await {
            match result.unwrap() {
                Ok(()) => ok += 1,
                Err(PortcullisError::ChallengeExists(_)) => duplicates += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(duplicates, 15);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = store();
        store.remove("never").await;

        let sess = session("s1");
        store.register(Arc::<Session>::downgrade(&sess), "r").await.unwrap();
        store.remove("r").await;
        assert!(!store.contains("r").await);
        store.remove("r").await;
    }

    #[tokio::test]
    async fn stale_owner_is_a_silent_noop() {
        let store = store();
        let sess = session("s1");
        store.register(Arc::<Session>::downgrade(&sess), "gone").await.unwrap();
        store.set_digits("gone", &[1]).await;
        drop(sess);

        // Writes are dropped, reads come back absent
        store.set_digits("gone", &[2]).await;
        assert_eq!(store.get_digits("gone", false).await, None);
        assert!(store.contains("gone").await);

        // A consuming read still cleans the index
        assert_eq!(store.get_digits("gone", true).await, None);
        assert!(!store.contains("gone").await);
    }
}
