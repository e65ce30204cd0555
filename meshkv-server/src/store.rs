use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use meshkv_common::{key_hash, Container, KeyHash, Result};

use crate::config::TOMBSTONE_HORIZON_SECS;
use crate::metric::Metric;
use crate::state::{StateSet, StateToken};

/// Abstraction over current time for testability.
pub trait Clock: Send + Sync {
    fn unix_now_secs(&self) -> u64;
}

/// Production clock backed by `SystemTime`.
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Callback invoked after a local mutation, while the write lock is still
/// held, so observers never see a token set inconsistent with the map.
pub type UpdateFn = Box<dyn Fn(KeyHash, &Container) + Send + Sync>;

struct StoreInner {
    containers: HashMap<KeyHash, Container>,
    state: StateSet,
    live_count: usize,
}

/// The local replica: containers keyed by key hash, the derived state set,
/// and the live-container count, guarded as one consistent unit.
pub struct Store {
    inner: RwLock<StoreInner>,
    clock: Arc<dyn Clock>,
    metric: Arc<dyn Metric>,
    update_fn: OnceLock<UpdateFn>,
}

impl Store {
    pub fn new(clock: Arc<dyn Clock>, metric: Arc<dyn Metric>) -> Store {
        Store {
            inner: RwLock::new(StoreInner {
                containers: HashMap::new(),
                state: StateSet::new(),
                live_count: 0,
            }),
            clock,
            metric,
            update_fn: OnceLock::new(),
        }
    }

    /// Installs the update observer; only the first installation wins.
    pub fn set_update_fn(&self, update_fn: UpdateFn) {
        let _ = self.update_fn.set(update_fn);
    }

    /// Sets the provided value at the provided key, creating or
    /// resurrecting the container as needed.
    pub fn set(&self, key: &[u8], value: &[u8]) {
        let kh = key_hash(key);
        let mut inner = self.inner.write();
        let StoreInner { containers, state, live_count } = &mut *inner;

        if let Some(container) = containers.get_mut(&kh) {
            state.remove(&StateToken::new(kh, container.revision));
            container.value = value.to_vec();
            container.revision += 1;
            if container.is_deleted() {
                container.undelete();
                *live_count += 1;
            }
            state.insert(StateToken::new(kh, container.revision));
        } else {
            let container = Container::new(key.to_vec(), value.to_vec());
            state.insert(StateToken::new(kh, container.revision));
            containers.insert(kh, container);
            *live_count += 1;
        }

        let container = &containers[&kh];
        self.metric.count_changed(*live_count, containers.len() - *live_count);
        if let Some(update_fn) = self.update_fn.get() {
            update_fn(kh, container);
        }
    }

    /// Returns the value at the provided key, or `None` if the key is
    /// absent or deleted.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let kh = key_hash(key);
        let inner = self.inner.read();
        inner
            .containers
            .get(&kh)
            .filter(|container| !container.is_deleted())
            .map(|container| container.value.clone())
    }

    /// Turns the container at the provided key into a tombstone. Deleting
    /// an absent or already-deleted key is a no-op.
    pub fn delete(&self, key: &[u8]) {
        let kh = key_hash(key);
        let mut inner = self.inner.write();
        let StoreInner { containers, state, live_count } = &mut *inner;

        let Some(container) = containers.get_mut(&kh) else { return };
        if container.is_deleted() {
            return;
        }

        state.remove(&StateToken::new(kh, container.revision));
        container.delete(self.clock.unix_now_secs());
        container.revision += 1;
        state.insert(StateToken::new(kh, container.revision));
        *live_count -= 1;

        let container = &containers[&kh];
        self.metric.count_changed(*live_count, containers.len() - *live_count);
        if let Some(update_fn) = self.update_fn.get() {
            update_fn(kh, container);
        }
    }

    /// Enumerates live containers in unspecified order, aborting on the
    /// first error the callback returns.
    pub fn each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        let inner = self.inner.read();
        for container in inner.containers.values() {
            if container.is_deleted() {
                continue;
            }
            f(&container.key, &container.value)?;
        }
        Ok(())
    }

    /// Number of live containers.
    pub fn len(&self) -> usize {
        self.inner.read().live_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tombstones.
    pub fn deleted_len(&self) -> usize {
        let inner = self.inner.read();
        inner.containers.len() - inner.live_count
    }

    /// Point-in-time view of the state set for the reconciler and tests.
    pub fn state(&self) -> StateSet {
        self.inner.read().state.clone()
    }

    /// Drops every container whose tombstone is older than the horizon,
    /// along with its state token.
    pub fn tidy(&self) {
        let now = self.clock.unix_now_secs();
        let mut inner = self.inner.write();
        let StoreInner { containers, state, live_count } = &mut *inner;

        let before = containers.len();
        containers.retain(|kh, container| match container.deleted_at {
            Some(deleted_at) if now.saturating_sub(deleted_at) > TOMBSTONE_HORIZON_SECS => {
                state.remove(&StateToken::new(*kh, container.revision));
                false
            }
            _ => true,
        });

        if containers.len() != before {
            self.metric.count_changed(*live_count, containers.len() - *live_count);
        }
    }

    /// Replication-internal: applies an inbound serialized container. The
    /// inbound record wins only with a higher revision, or with an equal
    /// revision and a later deletion timestamp. This path never invokes
    /// the update observer, so inbound replication does not echo.
    pub fn set_container(&self, kh: KeyHash, bytes: &[u8]) -> Result<()> {
        let incoming = Container::decode(bytes)?;
        let mut inner = self.inner.write();
        let StoreInner { containers, state, live_count } = &mut *inner;

        if let Some(current) = containers.get_mut(&kh) {
            let supersedes = incoming.revision > current.revision
                || (incoming.revision == current.revision && incoming.deleted_at > current.deleted_at);
            if !supersedes {
                return Ok(());
            }
            state.remove(&StateToken::new(kh, current.revision));
            match (current.is_deleted(), incoming.is_deleted()) {
                (false, true) => *live_count -= 1,
                (true, false) => *live_count += 1,
                _ => {}
            }
            *current = incoming;
            state.insert(StateToken::new(kh, current.revision));
        } else {
            if !incoming.is_deleted() {
                *live_count += 1;
            }
            state.insert(StateToken::new(kh, incoming.revision));
            containers.insert(kh, incoming);
        }

        self.metric.count_changed(*live_count, containers.len() - *live_count);
        Ok(())
    }

    /// Replication-internal: returns the serialized container stored under
    /// the provided key hash, tombstones included.
    pub fn get_container(&self, kh: KeyHash) -> Option<Vec<u8>> {
        self.inner.read().containers.get(&kh).map(Container::encode)
    }
}
