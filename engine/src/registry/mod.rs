//! Managed Resource Registry
//!
//! A concurrency-safe map of identity → resource handle shared by the worker
//! pool and the container orchestrator. It enforces:
//!
//! - a capacity ceiling, checked atomically with insertion or reservation
//! - duplicate rejection for `insert_with`
//! - removal paired with teardown: an entry leaves the lookup view when its
//!   teardown starts and is only dropped once teardown succeeded; a failed or
//!   abandoned teardown puts it back
//!
//! The map lock is only held for membership checks and updates, never across
//! an await. Teardown and provisioning run without it, so slow I/O for one
//! identity never blocks lookups or provisioning for another.
//!
//! Long-running provisioning work takes a per-identity [`ProvisioningGuard`]
//! with [`Registry::provisioning_slot`]: concurrent callers for the same
//! identity queue on it, callers for different identities never contend.
//! Capacity for a resource being provisioned is held by a [`Reservation`].

use sdk::errors::EngineError;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type SlotMap = std::sync::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Errors raised by registry operations
///
/// Each pool maps these onto its own domain errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry at capacity ({max})")]
    AtCapacity { max: usize },

    #[error("entry already exists: {0}")]
    Duplicate(String),

    #[error("entry not found: {0}")]
    NotFound(String),

    /// The build or teardown callback failed
    #[error(transparent)]
    Resource(#[from] EngineError),
}

struct Entries<R> {
    /// Visible to lookups
    live: HashMap<String, Arc<R>>,
    /// Teardown in progress
    retiring: HashMap<String, Arc<R>>,
    /// Being provisioned, not yet published
    reserved: HashSet<String>,
}

impl<R> Entries<R> {
    fn holds(&self, id: &str) -> bool {
        self.live.contains_key(id) || self.retiring.contains_key(id) || self.reserved.contains(id)
    }

    /// Distinct identities counted against capacity
    fn occupied(&self) -> usize {
        let retiring = self
            .retiring
            .keys()
            .filter(|id| !self.live.contains_key(*id))
            .count();
        let reserved = self
            .reserved
            .iter()
            .filter(|id| !self.live.contains_key(*id) && !self.retiring.contains_key(*id))
            .count();
        self.live.len() + retiring + reserved
    }

    /// Restore or drop retired handles once their teardown settled
    fn settle(&mut self, handles: Vec<(String, Arc<R>)>, torn_down: bool) {
        for (id, handle) in handles {
            if self
                .retiring
                .get(&id)
                .is_some_and(|current| Arc::ptr_eq(current, &handle))
            {
                self.retiring.remove(&id);
            }
            // A handle published in the meantime wins over the restored one
            if !torn_down {
                self.live.entry(id).or_insert(handle);
            }
        }
    }
}

/// Concurrency-safe, capacity-checked registry of shared resource handles
pub struct Registry<R> {
    kind: &'static str,
    capacity: Option<usize>,
    entries: RwLock<Entries<R>>,
    slots: Arc<SlotMap>,
}

impl<R: Send + Sync> Registry<R> {
    /// Create a registry; `kind` is only used in log lines
    pub fn new(kind: &'static str, capacity: Option<usize>) -> Self {
        Self {
            kind,
            capacity,
            entries: RwLock::new(Entries {
                live: HashMap::new(),
                retiring: HashMap::new(),
                reserved: HashSet::new(),
            }),
            slots: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn get(&self, id: &str) -> Option<Arc<R>> {
        self.read().live.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().live.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().live.is_empty()
    }

    /// Snapshot of all handles
    pub fn values(&self) -> Vec<Arc<R>> {
        self.read().live.values().cloned().collect()
    }

    /// Snapshot of all identities, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().live.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run `f` over the entries under a single shared lock
    ///
    /// Used for aggregate statistics that must come from one consistent view.
    pub fn inspect<T>(&self, f: impl FnOnce(&HashMap<String, Arc<R>>) -> T) -> T {
        f(&self.read().live)
    }

    /// Insert a new entry built by `build`, rejecting duplicates
    ///
    /// Capacity is checked first, then duplicates, then `build` runs. All three
    /// happen under the exclusive lock, so `build` must be cheap and synchronous.
    /// If `build` fails nothing is inserted.
    pub fn insert_with<F>(&self, id: &str, build: F) -> Result<Arc<R>, RegistryError>
    where
        F: FnOnce() -> Result<R, EngineError>,
    {
        let mut entries = self.write();

        if let Some(max) = self.capacity {
            if entries.occupied() >= max {
                return Err(RegistryError::AtCapacity { max });
            }
        }
        if entries.holds(id) {
            return Err(RegistryError::Duplicate(id.to_string()));
        }

        let handle = Arc::new(build()?);
        entries.live.insert(id.to_string(), Arc::clone(&handle));
        tracing::debug!("{} registry: inserted {}", self.kind, id);
        Ok(handle)
    }

    /// Insert or replace the entry for `id`
    ///
    /// Capacity only applies when `id` does not already hold a place.
    pub fn publish(&self, id: &str, value: R) -> Result<Arc<R>, RegistryError> {
        let mut entries = self.write();

        if !entries.holds(id) {
            if let Some(max) = self.capacity {
                if entries.occupied() >= max {
                    return Err(RegistryError::AtCapacity { max });
                }
            }
        }

        let handle = Arc::new(value);
        if entries
            .live
            .insert(id.to_string(), Arc::clone(&handle))
            .is_some()
        {
            tracing::debug!("{} registry: replaced {}", self.kind, id);
        } else {
            tracing::debug!("{} registry: published {}", self.kind, id);
        }
        Ok(handle)
    }

    /// Hold a place for `id` while its resource is provisioned
    ///
    /// The place counts against capacity until the reservation is published
    /// or dropped.
    pub fn reserve(&self, id: &str) -> Result<Reservation<'_, R>, RegistryError> {
        let mut entries = self.write();

        if !entries.holds(id) {
            if let Some(max) = self.capacity {
                if entries.occupied() >= max {
                    return Err(RegistryError::AtCapacity { max });
                }
            }
        }
        entries.reserved.insert(id.to_string());

        Ok(Reservation {
            registry: self,
            id: id.to_string(),
            active: true,
        })
    }

    /// Remove `id` only if it still maps to `stale`
    ///
    /// Returns true if the entry was discarded. A handle published by someone
    /// else in the meantime is left alone.
    pub fn discard(&self, id: &str, stale: &Arc<R>) -> bool {
        let mut entries = self.write();
        match entries.live.get(id) {
            Some(current) if Arc::ptr_eq(current, stale) => {
                entries.live.remove(id);
                tracing::debug!("{} registry: discarded stale {}", self.kind, id);
                true
            }
            _ => false,
        }
    }

    /// Tear down and remove the entry for `id`
    ///
    /// The entry is hidden from lookups while `teardown` runs; no lock is held
    /// meanwhile. If teardown fails, or its future is dropped, the entry is
    /// restored so a retry is meaningful.
    pub async fn remove_with<F, Fut>(&self, id: &str, teardown: F) -> Result<Arc<R>, RegistryError>
    where
        F: FnOnce(Arc<R>) -> Fut,
        Fut: Future<Output = Result<(), EngineError>>,
    {
        let handle = {
            let mut entries = self.write();
            let handle = entries
                .live
                .remove(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            entries
                .retiring
                .insert(id.to_string(), Arc::clone(&handle));
            handle
        };
        let mut retirement = Retirement {
            registry: self,
            handles: vec![(id.to_string(), Arc::clone(&handle))],
        };

        let result = teardown(Arc::clone(&handle)).await;
        retirement.settle(result.is_ok());
        result?;

        tracing::debug!("{} registry: removed {}", self.kind, id);
        Ok(handle)
    }

    /// Tear down every entry in one call, then clear the registry
    ///
    /// On teardown failure every entry is restored.
    pub async fn drain_with<F, Fut>(&self, teardown: F) -> Result<Vec<Arc<R>>, RegistryError>
    where
        F: FnOnce(Vec<Arc<R>>) -> Fut,
        Fut: Future<Output = Result<(), EngineError>>,
    {
        let retired: Vec<(String, Arc<R>)> = {
            let mut entries = self.write();
            let retired: Vec<(String, Arc<R>)> = entries.live.drain().collect();
            for (id, handle) in &retired {
                entries.retiring.insert(id.clone(), Arc::clone(handle));
            }
            retired
        };
        let handles: Vec<Arc<R>> = retired.iter().map(|(_, h)| Arc::clone(h)).collect();
        let mut retirement = Retirement {
            registry: self,
            handles: retired,
        };

        let result = teardown(handles.clone()).await;
        retirement.settle(result.is_ok());
        result?;

        tracing::debug!("{} registry: drained {} entries", self.kind, handles.len());
        Ok(handles)
    }

    /// Acquire the provisioning slot for `id`
    ///
    /// At most one guard per identity exists at a time. Waiting here does not
    /// hold the map lock.
    pub async fn provisioning_slot(&self, id: &str) -> ProvisioningGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(id.to_string()).or_default())
        };

        let guard = slot.lock_owned().await;
        ProvisioningGuard {
            id: id.to_string(),
            slots: Arc::clone(&self.slots),
            guard: Some(guard),
        }
    }

    /// Number of identities that currently have a provisioning slot allocated
    pub fn active_slots(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries<R>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries<R>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Capacity held for a resource that is still being provisioned
///
/// Dropping it without [`Reservation::publish`] gives the place back.
pub struct Reservation<'a, R: Send + Sync> {
    registry: &'a Registry<R>,
    id: String,
    active: bool,
}

impl<R: Send + Sync> Reservation<'_, R> {
    /// Make the provisioned resource visible, replacing any previous entry
    pub fn publish(mut self, value: R) -> Arc<R> {
        self.active = false;
        let mut entries = self.registry.write();
        entries.reserved.remove(&self.id);

        let handle = Arc::new(value);
        entries.live.insert(self.id.clone(), Arc::clone(&handle));
        tracing::debug!("{} registry: published {}", self.registry.kind, self.id);
        handle
    }
}

impl<R: Send + Sync> Drop for Reservation<'_, R> {
    fn drop(&mut self) {
        if self.active {
            self.registry.write().reserved.remove(&self.id);
        }
    }
}

/// Entries whose teardown is in flight
struct Retirement<'a, R: Send + Sync> {
    registry: &'a Registry<R>,
    handles: Vec<(String, Arc<R>)>,
}

impl<R: Send + Sync> Retirement<'_, R> {
    fn settle(&mut self, torn_down: bool) {
        let handles = std::mem::take(&mut self.handles);
        if !handles.is_empty() {
            self.registry.write().settle(handles, torn_down);
        }
    }
}

impl<R: Send + Sync> Drop for Retirement<'_, R> {
    fn drop(&mut self) {
        self.settle(false);
    }
}

/// Exclusive per-identity provisioning token
///
/// Dropping the guard releases the identity. The slot itself is freed once
/// nobody else is waiting on it.
pub struct ProvisioningGuard {
    id: String,
    slots: Arc<SlotMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ProvisioningGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for ProvisioningGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let idle = slots
            .get(&self.id)
            .map(|slot| Arc::strong_count(slot) == 1)
            .unwrap_or(false);
        if idle {
            slots.remove(&self.id);
        }
    }
}
