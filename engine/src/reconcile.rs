//! Reconciliation decisions for one record at a time.
//!
//! Pure functions: given what the store holds and what the server sent (or
//! what is about to be sent), decide what to do. The sync engine performs
//! the I/O around these decisions.
//!
//! # Pull policy
//!
//! 1. A local twin (same server id) that is unsynced wins: its pending edit
//!    reaches the server on the next push.
//! 2. A synced twin takes the server's values when they differ.
//! 3. Without a twin, a record competing for a taken daily slot is not
//!    inserted. A slot holder that was never pushed adopts the inbound server
//!    id, so its next push updates the server's record instead of colliding.
//! 4. Otherwise the inbound record is inserted as synced.

use crate::error::RemoteError;
use crate::model::{Entity, EntityKind, LocalId, Record, ServerId};

/// What the push phase does with one unsynced record.
#[derive(Debug, Clone, PartialEq)]
pub enum PushAction<W> {
    /// Never pushed: create it.
    Create(W),
    /// Known to the server: replace its fields.
    Update(ServerId, W),
    /// Its owner has no server id yet; retry on a later pass.
    Defer,
}

/// Plan the push of `record`, given its owner's current server id.
pub fn plan_push<E: Entity>(record: &Record<E>, owner_server_id: Option<&ServerId>) -> PushAction<E::Wire> {
    match record.data.to_wire(owner_server_id) {
        None => PushAction::Defer,
        Some(wire) => match &record.server_id {
            Some(server_id) => PushAction::Update(server_id.clone(), wire),
            None => PushAction::Create(wire),
        },
    }
}

/// Whether a failed create means "the server already holds this slot".
pub fn is_slot_conflict(kind: EntityKind, err: &RemoteError) -> bool {
    kind.unique_daily() && matches!(err, RemoteError::Api { status: 409, .. })
}

/// Why an inbound record was left out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Its required owner is not known locally.
    UnknownOwner(ServerId),
    /// Its daily slot is held by a local record bound to another server id.
    SlotTaken { holder: LocalId, holder_server_id: ServerId },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownOwner(owner) => write!(f, "owner {owner} is not known locally"),
            Self::SlotTaken {
                holder,
                holder_server_id,
            } => write!(
                f,
                "slot already held by local record {holder} (server id {holder_server_id})"
            ),
        }
    }
}

/// What the pull phase does with one inbound record.
#[derive(Debug, Clone, PartialEq)]
pub enum PullAction<E> {
    /// New to this device: insert it as synced.
    Insert(E),
    /// Overwrite a synced twin observed at `revision`.
    Refresh {
        local_id: LocalId,
        revision: i64,
        data: E,
    },
    /// A synced twin already holds these values.
    Unchanged,
    /// The twin has an unpushed edit; leave it.
    KeepLocal(LocalId),
    /// Bind the inbound server id to the never-pushed slot holder.
    Adopt(LocalId),
    Skip(SkipReason),
}

/// Decide what to do with `inbound`.
///
/// `twin` is the local record with the inbound server id; `slot_holder` is
/// the local record occupying the inbound record's daily slot, looked up
/// only for kinds limited to one record per owner per day.
pub fn plan_pull<E: Entity>(
    inbound: E,
    twin: Option<&Record<E>>,
    slot_holder: Option<&Record<E>>,
) -> PullAction<E> {
    if let Some(twin) = twin {
        if !twin.synced {
            return PullAction::KeepLocal(twin.local_id);
        }
        if twin.data == inbound {
            return PullAction::Unchanged;
        }
        return PullAction::Refresh {
            local_id: twin.local_id,
            revision: twin.revision,
            data: inbound,
        };
    }

    match slot_holder {
        Some(holder) => match &holder.server_id {
            None => PullAction::Adopt(holder.local_id),
            Some(holder_server_id) => PullAction::Skip(SkipReason::SlotTaken {
                holder: holder.local_id,
                holder_server_id: holder_server_id.clone(),
            }),
        },
        None => PullAction::Insert(inbound),
    }
}
