//! In-memory lock backends for tests and local runs.
//!
//! [`InMemoryLockBackend`] behaves like the remote cache (TTL keys, failure
//! injection, call counting); [`InMemoryRowLockBackend`] behaves like the
//! row-lock fallback (callers queue on a per-key mutex).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;

use crate::{BackendError, Lease, LockBackend, LockToken, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Lease returned by the in-memory remote backend.
#[derive(Debug)]
pub struct MemoryLease {
    token: LockToken,
}

impl Lease for MemoryLease {
    fn token(&self) -> &LockToken {
        &self.token
    }
}

#[derive(Debug, Default)]
struct RemoteState {
    holders: HashMap<String, (String, Instant)>,
    unavailable: bool,
    fail_next: u32,
    latency: Duration,
}

/// In-memory stand-in for the remote lock service.
#[derive(Debug, Clone)]
pub struct InMemoryLockBackend {
    state: Arc<Mutex<RemoteState>>,
    attempts: Arc<AtomicUsize>,
    acquire_timeout: Duration,
}

impl InMemoryLockBackend {
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(RemoteState::default())),
            attempts: Arc::new(AtomicUsize::new(0)),
            acquire_timeout,
        }
    }

    /// Makes every subsequent call fail as if the service were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Fails the next `count` calls, then recovers.
    pub fn fail_next(&self, count: u32) {
        self.state().fail_next = count;
    }

    /// Adds a delay to every acquisition attempt.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Number of acquisition attempts that reached this backend.
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Returns true if `key` is currently held and not expired.
    pub fn is_held(&self, key: &str) -> bool {
        self.state()
            .holders
            .get(key)
            .is_some_and(|(_, expires)| *expires > Instant::now())
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryLockBackend {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

#[async_trait]
impl LockBackend for InMemoryLockBackend {
    type Lease = MemoryLease;

    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<MemoryLease> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let latency = {
            let mut state = self.state();
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(BackendError::Unavailable(
                    "simulated connection timeout".to_string(),
                ));
            }
            if state.unavailable {
                return Err(BackendError::Unavailable(
                    "simulated connection refused".to_string(),
                ));
            }
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let token = LockToken::new(key, ttl);
        let started = Instant::now();
        loop {
            {
                let mut state = self.state();
                let now = Instant::now();
                let free = state
                    .holders
                    .get(key)
                    .is_none_or(|(_, expires)| *expires <= now);
                if free {
                    state
                        .holders
                        .insert(key.to_string(), (token.holder_id.clone(), now + ttl));
                    return Ok(MemoryLease { token });
                }
            }

            if started.elapsed() >= self.acquire_timeout {
                return Err(BackendError::Contended {
                    key: key.to_string(),
                    waited: self.acquire_timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn release(&self, lease: MemoryLease) -> Result<()> {
        let mut state = self.state();
        let owned = state
            .holders
            .get(&lease.token.key)
            .is_some_and(|(holder, _)| *holder == lease.token.holder_id);
        if owned {
            state.holders.remove(&lease.token.key);
        }
        Ok(())
    }
}

type Rows = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Drops the entry for `key` once nobody holds or waits on it.
fn prune_row(rows: &Rows, key: &str) {
    let mut rows = rows.lock().unwrap_or_else(PoisonError::into_inner);
    if rows.get(key).is_some_and(|row| Arc::strong_count(row) == 1) {
        rows.remove(key);
    }
}

/// Lease returned by the in-memory row-lock backend. Holding it holds the row.
#[derive(Debug)]
pub struct RowGuardLease {
    token: LockToken,
    guard: Option<OwnedMutexGuard<()>>,
    rows: Rows,
}

impl Drop for RowGuardLease {
    fn drop(&mut self) {
        self.guard.take();
        prune_row(&self.rows, &self.token.key);
    }
}

impl Lease for RowGuardLease {
    fn token(&self) -> &LockToken {
        &self.token
    }
}

/// In-memory stand-in for the relational row lock.
#[derive(Debug, Clone)]
pub struct InMemoryRowLockBackend {
    rows: Rows,
    lock_timeout: Duration,
    acquisitions: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl InMemoryRowLockBackend {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            rows: Arc::new(Mutex::new(HashMap::new())),
            lock_timeout,
            acquisitions: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes every acquisition fail as if the database aborted it.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of row locks successfully taken.
    pub fn acquisition_count(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Number of keys with a live row entry.
    pub fn tracked_rows(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn row(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(rows.entry(key.to_string()).or_default())
    }
}

impl Default for InMemoryRowLockBackend {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl LockBackend for InMemoryRowLockBackend {
    type Lease = RowGuardLease;

    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<RowGuardLease> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable(
                "simulated deadlock detected".to_string(),
            ));
        }

        let row = self.row(key);
        let acquired = tokio::time::timeout(self.lock_timeout, row.lock_owned()).await;
        let Ok(guard) = acquired else {
            prune_row(&self.rows, key);
            return Err(BackendError::Contended {
                key: key.to_string(),
                waited: self.lock_timeout,
            });
        };

        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(RowGuardLease {
            token: LockToken::new(key, ttl),
            guard: Some(guard),
            rows: Arc::clone(&self.rows),
        })
    }

    async fn release(&self, lease: RowGuardLease) -> Result<()> {
        drop(lease);
        Ok(())
    }
}
