//! Mutation gateway: the one way application code writes records.
//!
//! Every call commits to the store first and returns as soon as that write is
//! durable. When the device looks online, a single-record remote attempt is
//! spawned in the background; its failure is logged and the record simply
//! stays unsynced for the next full pass.

use crate::connectivity::Connectivity;
use crate::error::{Error, Result};
use crate::model::{Entity, LocalId, Record, ServerId};
use crate::remote::Remote;
use crate::store::Store;
use crate::sync::{PushFailure, Pushed, Pusher, SyncEngine};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub struct Gateway {
    store: Store,
    remote: Arc<dyn Remote>,
    connectivity: Arc<dyn Connectivity>,
    pusher: Pusher,
    tasks: Mutex<JoinSet<()>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("store", &self.store)
            .field("online", &self.connectivity.is_online())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// A gateway sharing the engine's store, server and per-record locks.
    pub fn new(engine: &SyncEngine) -> Self {
        let inner = engine.inner();
        Self {
            store: inner.store.clone(),
            remote: inner.remote.clone(),
            connectivity: inner.connectivity.clone(),
            pusher: inner.pusher.clone(),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Insert a record and, if online, try to create it on the server.
    ///
    /// Store errors (`InvalidRecord`, `NotFound` for a missing owner,
    /// `DuplicateRecord` for a taken report slot) are returned before any
    /// remote call is made.
    pub async fn create<E: Entity>(&self, data: E) -> Result<LocalId> {
        let local_id = self.store.insert(data).await?;
        if self.connectivity.is_online() {
            self.spawn_push::<E>(local_id);
        }
        Ok(local_id)
    }

    /// Apply `patch`, mark the record unsynced and, if online and the server
    /// already knows the record, try to update it there.
    ///
    /// A record without a server id is left for its pending create, which
    /// will carry these values.
    pub async fn update<E: Entity>(&self, local_id: LocalId, patch: E::Patch) -> Result<Record<E>> {
        let record = self.store.update_unsynced::<E>(local_id, patch).await?;
        if record.server_id.is_some() && self.connectivity.is_online() {
            self.spawn_push::<E>(local_id);
        }
        Ok(record)
    }

    /// Delete a record locally (with its dependents) and, if online, on the
    /// server too. A failed remote delete is not retried.
    pub async fn delete<E: Entity>(&self, local_id: LocalId) -> Result<Record<E>> {
        let record = self
            .store
            .delete::<E>(local_id)
            .await?
            .ok_or_else(|| Error::not_found(E::KIND, local_id))?;
        if let Some(server_id) = record.server_id.clone() {
            if self.connectivity.is_online() {
                self.spawn_remote_delete::<E>(local_id, server_id);
            } else {
                warn!(kind = %E::KIND, %local_id, %server_id, "deleted offline, server copy stays");
            }
        }
        Ok(record)
    }

    /// Wait for every remote attempt spawned so far.
    pub async fn settle(&self) {
        let mut tasks = std::mem::take(&mut *self.lock_tasks());
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "remote attempt task failed");
            }
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn a remote attempt, first dropping attempts that already finished.
    fn track<F>(&self, attempt: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.lock_tasks();
        while let Some(joined) = tasks.try_join_next() {
            if let Err(err) = joined {
                warn!(error = %err, "remote attempt task failed");
            }
        }
        tasks.spawn(attempt);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.lock_tasks().len()
    }

    fn spawn_push<E: Entity>(&self, local_id: LocalId) {
        let pusher = self.pusher.clone();
        self.track(async move {
            match pusher.push_one::<E>(local_id).await {
                Ok(Pushed::Created { server_id, synced } | Pushed::Updated { server_id, synced }) => {
                    debug!(kind = %E::KIND, %local_id, %server_id, synced, "pushed on write");
                }
                Ok(Pushed::Deferred) => {
                    debug!(kind = %E::KIND, %local_id, "owner not on server yet, left for sync");
                }
                Ok(Pushed::Skipped) => {}
                Err(PushFailure::Remote(err)) => {
                    warn!(kind = %E::KIND, %local_id, error = %err, "push on write failed, left for sync");
                }
                Err(PushFailure::Local(err)) => {
                    warn!(kind = %E::KIND, %local_id, error = %err, "push on write failed locally");
                }
            }
        });
    }

    fn spawn_remote_delete<E: Entity>(&self, local_id: LocalId, server_id: ServerId) {
        let remote = self.remote.clone();
        self.track(async move {
            match remote.delete(E::KIND, &server_id).await {
                Ok(()) => debug!(kind = %E::KIND, %local_id, %server_id, "deleted remotely"),
                Err(err) => {
                    warn!(kind = %E::KIND, %local_id, %server_id, error = %err, "remote delete failed, server copy stays");
                }
            }
        });
    }
}
