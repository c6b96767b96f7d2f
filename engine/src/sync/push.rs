//! Pushing one record, shared by the full pass and the gateway.

use crate::error::{Error, RemoteError};
use crate::model::{Entity, EntityKind, LocalId, ServerId};
use crate::reconcile::{is_slot_conflict, plan_push, PushAction};
use crate::remote::{self, ListFilter, Remote};
use crate::store::Store;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// One async mutex per record, so the full pass and a gateway write never
/// push the same record at the same time.
#[derive(Debug, Default)]
pub(crate) struct RecordLocks {
    locks: DashMap<(EntityKind, LocalId), Arc<Mutex<()>>>,
}

impl RecordLocks {
    pub async fn lock(&self, kind: EntityKind, local_id: LocalId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry((kind, local_id))
            .or_default()
            .value()
            .clone();
        lock.lock_owned().await
    }

    /// Drop the entry once nobody holds or waits for it.
    pub fn release(&self, kind: EntityKind, local_id: LocalId) {
        self.locks
            .remove_if(&(kind, local_id), |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Result of pushing one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Pushed {
    /// The server created the record. `synced` is false when a local edit
    /// landed meanwhile.
    Created { server_id: ServerId, synced: bool },
    Updated { server_id: ServerId, synced: bool },
    /// The owner has no server id yet.
    Deferred,
    /// Nothing to do: synced already, or deleted.
    Skipped,
}

#[derive(Debug)]
pub(crate) enum PushFailure {
    Remote(RemoteError),
    Local(Error),
}

impl From<Error> for PushFailure {
    fn from(err: Error) -> Self {
        Self::Local(err)
    }
}

impl From<RemoteError> for PushFailure {
    fn from(err: RemoteError) -> Self {
        Self::Remote(err)
    }
}

#[derive(Clone)]
pub(crate) struct Pusher {
    store: Store,
    remote: Arc<dyn Remote>,
    locks: Arc<RecordLocks>,
}

impl Pusher {
    pub fn new(store: Store, remote: Arc<dyn Remote>) -> Self {
        Self {
            store,
            remote,
            locks: Arc::new(RecordLocks::default()),
        }
    }

    /// Push record `local_id` of kind `E` if it is still unsynced.
    ///
    /// The record is re-read under its lock, so whichever caller comes second
    /// sees the first one's result instead of pushing again.
    pub async fn push_one<E: Entity>(&self, local_id: LocalId) -> Result<Pushed, PushFailure> {
        let guard = self.locks.lock(E::KIND, local_id).await;
        let result = self.push_locked::<E>(local_id).await;
        drop(guard);
        self.locks.release(E::KIND, local_id);
        result
    }

    async fn push_locked<E: Entity>(&self, local_id: LocalId) -> Result<Pushed, PushFailure> {
        let Some(record) = self.store.get::<E>(local_id).await? else {
            return Ok(Pushed::Skipped);
        };
        if record.synced {
            return Ok(Pushed::Skipped);
        }

        let owner_server_id = match (E::KIND.owner(), record.data.link()) {
            (Some(owner_kind), Some(link)) => self.store.server_id_of(owner_kind, link.owner).await?,
            _ => None,
        };
        let mut data = record.data.clone();
        data.set_owner_server_id(owner_server_id.clone());

        match plan_push(&record, owner_server_id.as_ref()) {
            PushAction::Defer => {
                debug!(kind = %E::KIND, %local_id, "deferred until owner is pushed");
                Ok(Pushed::Deferred)
            }
            PushAction::Update(server_id, wire) => {
                remote::update::<E>(self.remote.as_ref(), &server_id, &wire).await?;
                let synced = self
                    .store
                    .mark_pushed(local_id, record.revision, &server_id, &data)
                    .await?;
                debug!(kind = %E::KIND, %local_id, %server_id, synced, "updated remotely");
                Ok(Pushed::Updated { server_id, synced })
            }
            PushAction::Create(wire) => {
                match remote::create::<E>(self.remote.as_ref(), &wire).await {
                    Ok(created) => {
                        let server_id = created.id;
                        let synced = self
                            .store
                            .mark_pushed(local_id, record.revision, &server_id, &data)
                            .await?;
                        debug!(kind = %E::KIND, %local_id, %server_id, synced, "created remotely");
                        Ok(Pushed::Created { server_id, synced })
                    }
                    Err(err) if is_slot_conflict(E::KIND, &err) => {
                        let Some(server_id) = self
                            .find_slot_twin::<E>(owner_server_id.as_ref(), &data)
                            .await?
                        else {
                            return Err(err.into());
                        };
                        // The server already holds this slot (an earlier create whose
                        // response was lost, or another device): take its id and
                        // write our values over it.
                        self.store
                            .adopt_server_id(E::KIND, local_id, &server_id)
                            .await?;
                        remote::update::<E>(self.remote.as_ref(), &server_id, &wire).await?;
                        let synced = self
                            .store
                            .mark_pushed(local_id, record.revision, &server_id, &data)
                            .await?;
                        debug!(kind = %E::KIND, %local_id, %server_id, synced, "took over existing slot");
                        Ok(Pushed::Updated { server_id, synced })
                    }
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    async fn find_slot_twin<E: Entity>(
        &self,
        owner: Option<&ServerId>,
        data: &E,
    ) -> Result<Option<ServerId>, RemoteError> {
        let (Some(owner), Some(day)) = (owner, data.day()) else {
            return Ok(None);
        };
        let filter = ListFilter::default().owner(owner.clone()).day(day);
        let found = self.remote.list(E::KIND, &filter).await?;
        Ok(found
            .into_iter()
            .filter_map(|value| remote::decode::<E::Wire>(value).ok())
            .find(|record| E::wire_owner(&record.fields) == Some(owner))
            .map(|record| record.id))
    }
}
