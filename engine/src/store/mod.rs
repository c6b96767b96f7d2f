//! Store - the durable on-device record store.
//!
//! One SQLite table per [`EntityKind`], all with the same layout. The store is
//! the single source of truth for readers; every write bumps the record's
//! `revision` and is announced on the change feed.
//!
//! Writes coming from the sync engine (`mark_pushed`, `apply_pulled`, ...) are
//! compare-and-set on the revision the engine observed, so a local edit that
//! lands while a network call is in flight is never marked synced or
//! overwritten.

mod query;
mod rows;

pub use query::{Filter, Order};

use crate::error::{Error, Result};
use crate::model::{Entity, EntityKind, LandPlot, LocalId, Record, Report, ServerId};
use chrono::{DateTime, NaiveDate, Utc};
use rows::{to_millis, write_error, IndexColumns, StoredRow, COLUMNS};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::broadcast;
use tracing::debug;

const CHANGE_FEED_CAPACITY: usize = 256;

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Inserted,
    Updated,
    Deleted,
}

/// A committed change, published on [`Store::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreChange {
    pub kind: EntityKind,
    pub local_id: LocalId,
    pub change: ChangeKind,
}

/// Dashboard numbers for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTotals {
    pub day: NaiveDate,
    /// Animals in the herd (not only those reported on)
    pub animals: u64,
    pub reports: u64,
    pub milk: f64,
    pub feed: f64,
}

/// The local record store.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    changes: broadcast::Sender<StoreChange>,
}

impl Store {
    /// Open (creating if needed) a store file and run migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// A private in-memory store. Lives as long as the returned handle.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // An in-memory database exists per connection: keep exactly one, forever.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Open the file named by `path`, or an in-memory store when `None`.
    pub async fn open_or_memory(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::open(path).await,
            None => Self::open_in_memory().await,
        }
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self { pool, changes })
    }

    /// Live change feed. Slow receivers see `Lagged` and should re-query.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    fn announce(&self, kind: EntityKind, local_id: LocalId, change: ChangeKind) {
        // No receivers is fine.
        let _ = self.changes.send(StoreChange {
            kind,
            local_id,
            change,
        });
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    pub async fn get<E: Entity>(&self, local_id: LocalId) -> Result<Option<Record<E>>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE local_id = ?",
            E::KIND.table()
        );
        sqlx::query_as::<_, StoredRow>(&sql)
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?
            .map(StoredRow::into_record)
            .transpose()
    }

    /// Like [`Store::get`], failing with `NotFound` when absent.
    pub async fn require<E: Entity>(&self, local_id: LocalId) -> Result<Record<E>> {
        self.get(local_id)
            .await?
            .ok_or_else(|| Error::not_found(E::KIND, local_id))
    }

    pub async fn query<E: Entity>(&self, filter: &Filter, order: Order) -> Result<Vec<Record<E>>> {
        filter
            .select(E::KIND, order)
            .build_query_as::<StoredRow>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(StoredRow::into_record)
            .collect()
    }

    /// Local ids matching `filter`, without decoding the records.
    pub async fn local_ids(&self, kind: EntityKind, filter: &Filter, order: Order) -> Result<Vec<LocalId>> {
        let rows: Vec<StoredRow> = filter
            .select(kind, order)
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.local_id).collect())
    }

    pub async fn count(&self, kind: EntityKind, filter: &Filter) -> Result<u64> {
        let (count,): (i64,) = filter
            .count(kind)
            .build_query_as()
            .fetch_one(&self.pool)
            .await?;
        // COUNT(*) is never negative.
        Ok(count.max(0) as u64)
    }

    pub async fn find_by_server_id<E: Entity>(&self, server_id: &ServerId) -> Result<Option<Record<E>>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE server_id = ?",
            E::KIND.table()
        );
        sqlx::query_as::<_, StoredRow>(&sql)
            .bind(server_id)
            .fetch_optional(&self.pool)
            .await?
            .map(StoredRow::into_record)
            .transpose()
    }

    /// The record occupying an (owner, day) slot, if any.
    pub async fn find_in_slot<E: Entity>(&self, owner: LocalId, day: NaiveDate) -> Result<Option<Record<E>>> {
        let mut found = self
            .query::<E>(&Filter::new().slot(owner, day).limit(1), Order::Oldest)
            .await?;
        Ok(found.pop())
    }

    pub async fn exists(&self, kind: EntityKind, local_id: LocalId) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE local_id = ?", kind.table());
        let row: Option<(i64,)> = sqlx::query_as(&sql)
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Server id of any record, by kind and local id.
    pub async fn server_id_of(&self, kind: EntityKind, local_id: LocalId) -> Result<Option<ServerId>> {
        let sql = format!("SELECT server_id FROM {} WHERE local_id = ?", kind.table());
        let row: Option<(Option<ServerId>,)> = sqlx::query_as(&sql)
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|(server_id,)| server_id))
    }

    /// Local id of any record, by kind and server id.
    pub async fn local_id_of(&self, kind: EntityKind, server_id: &ServerId) -> Result<Option<LocalId>> {
        let sql = format!("SELECT local_id FROM {} WHERE server_id = ?", kind.table());
        let row: Option<(LocalId,)> = sqlx::query_as(&sql)
            .bind(server_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(local_id,)| local_id))
    }

    /// Records still waiting to reach the server, across every kind.
    pub async fn count_unsynced(&self) -> Result<u64> {
        Ok(self.pending_counts().await?.values().sum())
    }

    /// Unsynced records per kind. Every kind is present, zero or not.
    pub async fn pending_counts(&self) -> Result<BTreeMap<EntityKind, u64>> {
        let mut counts = BTreeMap::new();
        for kind in EntityKind::ALL {
            counts.insert(kind, self.count(kind, &Filter::new().unsynced()).await?);
        }
        Ok(counts)
    }

    pub async fn daily_totals(&self, day: NaiveDate) -> Result<DailyTotals> {
        let animals = self.count(EntityKind::Animal, &Filter::new()).await?;
        let reports = self
            .query::<Report>(&Filter::new().day(day), Order::Oldest)
            .await?;
        Ok(DailyTotals {
            day,
            animals,
            reports: reports.len() as u64,
            milk: reports.iter().map(|r| r.data.milk).sum(),
            feed: reports.iter().map(|r| r.data.feed).sum(),
        })
    }

    // ---------------------------------------------------------------------
    // Local writes
    // ---------------------------------------------------------------------

    /// Insert a new, unsynced record.
    ///
    /// Fails with `InvalidRecord` on field errors, `NotFound` when the owner
    /// does not exist and `DuplicateRecord` when the (owner, day) slot is taken.
    pub async fn insert<E: Entity>(&self, mut data: E) -> Result<LocalId> {
        data.validate()?;
        self.resolve_link(&mut data).await?;
        self.check_slot(&data, None).await?;

        let columns = IndexColumns::of(&data)?;
        let sql = format!(
            "INSERT INTO {} (server_id, synced, revision, created_at, owner_id, day, category, payload)
             VALUES (NULL, 0, 1, ?, ?, ?, ?, ?)",
            E::KIND.table()
        );
        let result = sqlx::query(&sql)
            .bind(to_millis(Utc::now()))
            .bind(columns.owner_id)
            .bind(columns.day)
            .bind(columns.category)
            .bind(columns.payload)
            .execute(&self.pool)
            .await
            .map_err(|err| write_error(E::KIND, None, err))?;

        let local_id = LocalId::new(result.last_insert_rowid());
        debug!(kind = %E::KIND, %local_id, "inserted");
        self.announce(E::KIND, local_id, ChangeKind::Inserted);
        Ok(local_id)
    }

    /// Merge `patch` into a record. The `synced` flag is left as it is.
    pub async fn update<E: Entity>(&self, local_id: LocalId, patch: E::Patch) -> Result<Record<E>> {
        self.write_patch(local_id, patch, false).await
    }

    /// Merge `patch` into a record and mark it unsynced in the same write.
    pub(crate) async fn update_unsynced<E: Entity>(
        &self,
        local_id: LocalId,
        patch: E::Patch,
    ) -> Result<Record<E>> {
        self.write_patch(local_id, patch, true).await
    }

    async fn write_patch<E: Entity>(
        &self,
        local_id: LocalId,
        patch: E::Patch,
        mark_unsynced: bool,
    ) -> Result<Record<E>> {
        let mut record = self.require::<E>(local_id).await?;
        let previous_owner = record.data.link().map(|link| link.owner);
        record.data.apply(patch);
        record.data.validate()?;
        if record.data.link().map(|link| link.owner) != previous_owner {
            self.resolve_link(&mut record.data).await?;
        }
        self.check_slot(&record.data, Some(local_id)).await?;

        let columns = IndexColumns::of(&record.data)?;
        let sql = format!(
            "UPDATE {} SET owner_id = ?, day = ?, category = ?, payload = ?,
                 revision = revision + 1,
                 synced = CASE WHEN ? THEN 0 ELSE synced END
             WHERE local_id = ?
             RETURNING revision, synced",
            E::KIND.table()
        );
        let row: Option<(i64, bool)> = sqlx::query_as(&sql)
            .bind(columns.owner_id)
            .bind(columns.day)
            .bind(columns.category)
            .bind(columns.payload)
            .bind(mark_unsynced)
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| write_error(E::KIND, None, err))?;
        let (revision, synced) = row.ok_or_else(|| Error::not_found(E::KIND, local_id))?;
        record.revision = revision;
        record.synced = synced;

        debug!(kind = %E::KIND, %local_id, revision, "updated");
        self.announce(E::KIND, local_id, ChangeKind::Updated);
        Ok(record)
    }

    /// Delete a record together with what depends on it.
    ///
    /// Owned records whose link is required are deleted; optional links
    /// (land plots) are cleared instead. Everything happens in one
    /// transaction. Returns the deleted record, or `None` if it was already gone.
    pub async fn delete<E: Entity>(&self, local_id: LocalId) -> Result<Option<Record<E>>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE local_id = ?",
            E::KIND.table()
        );
        let Some(row) = sqlx::query_as::<_, StoredRow>(&sql)
            .bind(local_id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };
        let record = row.into_record::<E>()?;

        let mut changes = Vec::new();
        for dependent in E::KIND.dependents() {
            match dependent {
                EntityKind::LandPlot => {
                    for child in detach_dependents::<LandPlot>(&mut tx, local_id).await? {
                        changes.push((dependent, child, ChangeKind::Updated));
                    }
                }
                _ => {
                    for child in delete_dependents(&mut tx, dependent, local_id).await? {
                        changes.push((dependent, child, ChangeKind::Deleted));
                    }
                }
            }
        }

        let sql = format!("DELETE FROM {} WHERE local_id = ?", E::KIND.table());
        sqlx::query(&sql).bind(local_id).execute(&mut *tx).await?;
        tx.commit().await?;

        debug!(kind = %E::KIND, %local_id, dependents = changes.len(), "deleted");
        for (kind, child, change) in changes {
            self.announce(kind, child, change);
        }
        self.announce(E::KIND, local_id, ChangeKind::Deleted);
        Ok(Some(record))
    }

    /// Fill in the owner's server id and make sure the owner exists.
    async fn resolve_link<E: Entity>(&self, data: &mut E) -> Result<()> {
        let (Some(owner_kind), Some(link)) = (E::KIND.owner(), data.link()) else {
            return Ok(());
        };
        if !self.exists(owner_kind, link.owner).await? {
            return Err(Error::not_found(owner_kind, link.owner));
        }
        data.set_owner_server_id(self.server_id_of(owner_kind, link.owner).await?);
        Ok(())
    }

    async fn check_slot<E: Entity>(&self, data: &E, own: Option<LocalId>) -> Result<()> {
        if !E::KIND.unique_daily() {
            return Ok(());
        }
        let (Some(link), Some(day)) = (data.link(), data.day()) else {
            return Ok(());
        };
        let mut filter = Filter::new().slot(link.owner, day);
        if let Some(own) = own {
            filter = filter.excluding(own);
        }
        if self.count(E::KIND, &filter).await? > 0 {
            return Err(Error::DuplicateRecord {
                kind: E::KIND,
                reason: format!(
                    "{} {} already has a {} on {day}",
                    E::KIND.owner().map_or("owner", EntityKind::name),
                    link.owner,
                    E::KIND
                ),
            });
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Sync writes
    // ---------------------------------------------------------------------

    /// Record a successful push.
    ///
    /// The server id is stored unconditionally (the server now holds the
    /// record, whatever happened locally meanwhile). `data` (carrying the
    /// owner's server id) and `synced = true` are only written if the record
    /// is still at `revision`. Returns whether the record is now synced.
    pub(crate) async fn mark_pushed<E: Entity>(
        &self,
        local_id: LocalId,
        revision: i64,
        server_id: &ServerId,
        data: &E,
    ) -> Result<bool> {
        let payload = serde_json::to_string(data)?;
        let sql = format!(
            "UPDATE {} SET server_id = ?,
                 synced = CASE WHEN revision = ? THEN 1 ELSE synced END,
                 payload = CASE WHEN revision = ? THEN ? ELSE payload END
             WHERE local_id = ? AND (server_id IS NULL OR server_id = ?)
             RETURNING synced",
            E::KIND.table()
        );
        let row: Option<(bool,)> = sqlx::query_as(&sql)
            .bind(server_id)
            .bind(revision)
            .bind(revision)
            .bind(payload)
            .bind(local_id)
            .bind(server_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| write_error(E::KIND, Some(server_id), err))?;

        match row {
            Some((synced,)) => {
                self.announce(E::KIND, local_id, ChangeKind::Updated);
                Ok(synced)
            }
            None if self.exists(E::KIND, local_id).await? => Err(Error::IdentityConflict {
                kind: E::KIND,
                server_id: server_id.clone(),
            }),
            // Deleted while the push was in flight.
            None => Ok(false),
        }
    }

    /// Insert a record that came from the server, already synced.
    pub(crate) async fn insert_pulled<E: Entity>(
        &self,
        server_id: &ServerId,
        created_at: Option<DateTime<Utc>>,
        data: &E,
    ) -> Result<LocalId> {
        let columns = IndexColumns::of(data)?;
        let sql = format!(
            "INSERT INTO {} (server_id, synced, revision, created_at, owner_id, day, category, payload)
             VALUES (?, 1, 1, ?, ?, ?, ?, ?)",
            E::KIND.table()
        );
        let result = sqlx::query(&sql)
            .bind(server_id)
            .bind(to_millis(created_at.unwrap_or_else(Utc::now)))
            .bind(columns.owner_id)
            .bind(columns.day)
            .bind(columns.category)
            .bind(columns.payload)
            .execute(&self.pool)
            .await
            .map_err(|err| write_error(E::KIND, Some(server_id), err))?;

        let local_id = LocalId::new(result.last_insert_rowid());
        self.announce(E::KIND, local_id, ChangeKind::Inserted);
        Ok(local_id)
    }

    /// Overwrite a synced record with the server's values, if it is still
    /// synced and still at `revision`. Returns whether the write happened.
    pub(crate) async fn apply_pulled<E: Entity>(
        &self,
        local_id: LocalId,
        revision: i64,
        data: &E,
    ) -> Result<bool> {
        let columns = IndexColumns::of(data)?;
        let sql = format!(
            "UPDATE {} SET owner_id = ?, day = ?, category = ?, payload = ?
             WHERE local_id = ? AND revision = ? AND synced = 1",
            E::KIND.table()
        );
        let result = sqlx::query(&sql)
            .bind(columns.owner_id)
            .bind(columns.day)
            .bind(columns.category)
            .bind(columns.payload)
            .bind(local_id)
            .bind(revision)
            .execute(&self.pool)
            .await
            .map_err(|err| write_error(E::KIND, None, err))?;

        let applied = result.rows_affected() > 0;
        if applied {
            self.announce(E::KIND, local_id, ChangeKind::Updated);
        }
        Ok(applied)
    }

    /// Bind a server id to a local record that has none yet. Fields and the
    /// `synced` flag are untouched. Returns whether the binding happened.
    pub(crate) async fn adopt_server_id(
        &self,
        kind: EntityKind,
        local_id: LocalId,
        server_id: &ServerId,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET server_id = ? WHERE local_id = ? AND server_id IS NULL",
            kind.table()
        );
        let result = sqlx::query(&sql)
            .bind(server_id)
            .bind(local_id)
            .execute(&self.pool)
            .await
            .map_err(|err| write_error(kind, Some(server_id), err))?;

        let adopted = result.rows_affected() > 0;
        if adopted {
            self.announce(kind, local_id, ChangeKind::Updated);
        }
        Ok(adopted)
    }
}

async fn delete_dependents(
    tx: &mut Transaction<'_, Sqlite>,
    kind: EntityKind,
    owner: LocalId,
) -> Result<Vec<LocalId>> {
    let sql = format!(
        "DELETE FROM {} WHERE owner_id = ? RETURNING local_id",
        kind.table()
    );
    let rows: Vec<(LocalId,)> = sqlx::query_as(&sql)
        .bind(owner)
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Clear an optional link on every record pointing at `owner`. The records
/// become unsynced so the cleared link reaches the server.
async fn detach_dependents<E: Entity>(
    tx: &mut Transaction<'_, Sqlite>,
    owner: LocalId,
) -> Result<Vec<LocalId>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM {} WHERE owner_id = ?",
        E::KIND.table()
    );
    let rows: Vec<StoredRow> = sqlx::query_as(&sql)
        .bind(owner)
        .fetch_all(&mut **tx)
        .await?;

    let update = format!(
        "UPDATE {} SET owner_id = NULL, payload = ?, synced = 0, revision = revision + 1
         WHERE local_id = ?",
        E::KIND.table()
    );
    let mut detached = Vec::with_capacity(rows.len());
    for row in rows {
        let mut record = row.into_record::<E>()?;
        record.data.detach();
        sqlx::query(&update)
            .bind(serde_json::to_string(&record.data)?)
            .bind(record.local_id)
            .execute(&mut **tx)
            .await?;
        detached.push(record.local_id);
    }
    Ok(detached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Animal, AnimalPatch, AnimalType, Crop, Expense, ExpenseCosts, Income, LandPlot, Report,
        ReportPatch,
    };

    fn june(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    async fn store() -> Store {
        Store::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn insert_assigns_fresh_unsynced_records() {
        let store = store().await;
        let a = store.insert(Animal::new("Bessie", AnimalType::Cow)).await.unwrap();
        let b = store.insert(Animal::new("Daisy", AnimalType::Cow)).await.unwrap();
        assert_ne!(a, b);

        let record = store.require::<Animal>(a).await.unwrap();
        assert!(!record.synced);
        assert!(record.server_id.is_none());
        assert_eq!(record.revision, 1);
        assert_eq!(record.data.name, "Bessie");
    }

    #[tokio::test]
    async fn local_ids_are_never_reused() {
        let store = store().await;
        let a = store.insert(Animal::new("Bessie", AnimalType::Cow)).await.unwrap();
        store.delete::<Animal>(a).await.unwrap();
        let b = store.insert(Animal::new("Daisy", AnimalType::Cow)).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn second_report_in_slot_is_rejected() {
        let store = store().await;
        let a = store.insert(Animal::new("Bessie", AnimalType::Cow)).await.unwrap();
        store
            .insert(Report::new(a, june(1)).with_milk(12.0))
            .await
            .unwrap();

        let err = store
            .insert(Report::new(a, june(1)).with_milk(3.0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateRecord { kind: EntityKind::Report, .. }));

        let reports = store
            .query::<Report>(&Filter::new().slot(a, june(1)), Order::Newest)
            .await
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].data.milk, 12.0);
    }

    #[tokio::test]
    async fn moving_a_report_into_a_taken_slot_is_rejected() {
        let store = store().await;
        let a = store.insert(Animal::new("Bessie", AnimalType::Cow)).await.unwrap();
        store.insert(Report::new(a, june(1))).await.unwrap();
        let second = store.insert(Report::new(a, june(2))).await.unwrap();

        let err = store
            .update::<Report>(
                second,
                ReportPatch {
                    date: Some(june(1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateRecord { .. }));

        // Editing a report in place does not collide with itself.
        let updated = store
            .update::<Report>(
                second,
                ReportPatch {
                    milk: Some(8.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.data.milk, 8.0);
    }

    #[tokio::test]
    async fn report_needs_an_existing_animal() {
        let store = store().await;
        let err = store
            .insert(Report::new(LocalId::new(99), june(1)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                kind: EntityKind::Animal,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn update_bumps_revision_and_keeps_sync_flag() {
        let store = store().await;
        let a = store.insert(Animal::new("Bessie", AnimalType::Cow)).await.unwrap();
        store
            .mark_pushed(a, 1, &ServerId::from("s1"), &Animal::new("Bessie", AnimalType::Cow))
            .await
            .unwrap();

        let record = store
            .update::<Animal>(
                a,
                AnimalPatch {
                    age: Some(3.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(record.revision, 2);
        assert!(record.synced);

        let record = store
            .update_unsynced::<Animal>(a, AnimalPatch::default())
            .await
            .unwrap();
        assert_eq!(record.revision, 3);
        assert!(!record.synced);
    }

    #[tokio::test]
    async fn update_of_missing_record_is_not_found() {
        let store = store().await;
        let err = store
            .update::<Animal>(LocalId::new(4), AnimalPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn deleting_an_animal_cascades_to_reports() {
        let store = store().await;
        let a = store.insert(Animal::new("Bessie", AnimalType::Cow)).await.unwrap();
        let b = store.insert(Animal::new("Daisy", AnimalType::Cow)).await.unwrap();
        store.insert(Report::new(a, june(1))).await.unwrap();
        store.insert(Report::new(a, june(2))).await.unwrap();
        let kept = store.insert(Report::new(b, june(1))).await.unwrap();

        let mut feed = store.subscribe();
        assert!(store.delete::<Animal>(a).await.unwrap().is_some());

        let remaining = store
            .query::<Report>(&Filter::new(), Order::Oldest)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].local_id, kept);
        assert!(store.get::<Animal>(a).await.unwrap().is_none());

        let mut deleted = Vec::new();
        while let Ok(change) = feed.try_recv() {
            deleted.push((change.kind, change.change));
        }
        assert_eq!(
            deleted,
            vec![
                (EntityKind::Report, ChangeKind::Deleted),
                (EntityKind::Report, ChangeKind::Deleted),
                (EntityKind::Animal, ChangeKind::Deleted),
            ]
        );

        // A retried delete is harmless.
        assert!(store.delete::<Animal>(a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_a_crop_detaches_land_and_drops_money() {
        let store = store().await;
        let crop = store.insert(Crop::new("Wheat")).await.unwrap();
        store
            .insert(Expense::new(crop, june(1), ExpenseCosts::default()))
            .await
            .unwrap();
        store
            .insert(Income::new(crop, june(30), 10.0, 5.0))
            .await
            .unwrap();
        let plot = store
            .insert(LandPlot::new("North", 2.0).growing(crop))
            .await
            .unwrap();

        store.delete::<Crop>(crop).await.unwrap();

        assert_eq!(store.count(EntityKind::Expense, &Filter::new()).await.unwrap(), 0);
        assert_eq!(store.count(EntityKind::Income, &Filter::new()).await.unwrap(), 0);
        let plot = store.require::<LandPlot>(plot).await.unwrap();
        assert_eq!(plot.data.current_crop_id, None);
        assert_eq!(plot.revision, 2);
        assert!(!plot.synced);
    }

    #[tokio::test]
    async fn query_filters_and_orders() {
        let store = store().await;
        store.insert(Animal::new("Bessie", AnimalType::Cow)).await.unwrap();
        store.insert(Animal::new("Billy", AnimalType::Goat)).await.unwrap();
        let last = store.insert(Animal::new("Daisy", AnimalType::Cow)).await.unwrap();

        let cows = store
            .query::<Animal>(&Filter::new().category("cow"), Order::Newest)
            .await
            .unwrap();
        assert_eq!(cows.len(), 2);
        assert_eq!(cows[0].local_id, last);

        let oldest = store
            .query::<Animal>(&Filter::new().limit(1), Order::Oldest)
            .await
            .unwrap();
        assert_eq!(oldest[0].data.name, "Bessie");
    }

    #[tokio::test]
    async fn mark_pushed_respects_concurrent_edits() {
        let store = store().await;
        let a = store.insert(Animal::new("Bessie", AnimalType::Cow)).await.unwrap();
        let seen = store.require::<Animal>(a).await.unwrap();

        // A local edit lands while the push is in flight.
        store
            .update_unsynced::<Animal>(
                a,
                AnimalPatch {
                    name: Some("Bess".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let synced = store
            .mark_pushed(a, seen.revision, &ServerId::from("s1"), &seen.data)
            .await
            .unwrap();
        assert!(!synced);

        let record = store.require::<Animal>(a).await.unwrap();
        assert_eq!(record.server_id, Some(ServerId::from("s1")));
        assert_eq!(record.data.name, "Bess");
        assert!(!record.synced);
    }

    #[tokio::test]
    async fn server_ids_are_never_reassigned() {
        let store = store().await;
        let a = store.insert(Animal::new("Bessie", AnimalType::Cow)).await.unwrap();
        let b = store.insert(Animal::new("Daisy", AnimalType::Cow)).await.unwrap();
        let data = Animal::new("x", AnimalType::Cow);

        store.mark_pushed(a, 1, &ServerId::from("s1"), &data).await.unwrap();
        let err = store
            .mark_pushed(a, 1, &ServerId::from("s2"), &data)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IdentityConflict { .. }));

        let err = store
            .mark_pushed(b, 1, &ServerId::from("s1"), &data)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IdentityConflict { .. }));
        assert!(!store
            .adopt_server_id(EntityKind::Animal, a, &ServerId::from("s3"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn apply_pulled_skips_unsynced_records() {
        let store = store().await;
        let server_id = ServerId::from("s1");
        let a = store
            .insert_pulled(&server_id, None, &Animal::new("Bessie", AnimalType::Cow))
            .await
            .unwrap();
        assert!(store
            .apply_pulled(a, 1, &Animal::new("Bessie II", AnimalType::Cow))
            .await
            .unwrap());

        store
            .update_unsynced::<Animal>(a, AnimalPatch::default())
            .await
            .unwrap();
        assert!(!store
            .apply_pulled(a, 2, &Animal::new("Bessie III", AnimalType::Cow))
            .await
            .unwrap());
        let record = store.find_by_server_id::<Animal>(&server_id).await.unwrap().unwrap();
        assert_eq!(record.data.name, "Bessie II");
    }

    #[tokio::test]
    async fn pending_counts_and_daily_totals() {
        let store = store().await;
        let a = store.insert(Animal::new("Bessie", AnimalType::Cow)).await.unwrap();
        let b = store.insert(Animal::new("Daisy", AnimalType::Cow)).await.unwrap();
        store
            .insert(Report::new(a, june(1)).with_milk(12.0).with_feed(4.0))
            .await
            .unwrap();
        store
            .insert(Report::new(b, june(1)).with_milk(9.5).with_feed(3.5))
            .await
            .unwrap();
        store
            .insert(Report::new(b, june(2)).with_milk(100.0))
            .await
            .unwrap();

        let pending = store.pending_counts().await.unwrap();
        assert_eq!(pending[&EntityKind::Animal], 2);
        assert_eq!(pending[&EntityKind::Report], 3);
        assert_eq!(pending[&EntityKind::Crop], 0);
        assert_eq!(store.count_unsynced().await.unwrap(), 5);

        let totals = store.daily_totals(june(1)).await.unwrap();
        assert_eq!(totals.animals, 2);
        assert_eq!(totals.reports, 2);
        assert_eq!(totals.milk, 21.5);
        assert_eq!(totals.feed, 7.5);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paddock.db");
        let id = {
            let store = Store::open(&path).await.unwrap();
            store.insert(Animal::new("Bessie", AnimalType::Cow)).await.unwrap()
        };
        let store = Store::open(&path).await.unwrap();
        let record = store.require::<Animal>(id).await.unwrap();
        assert_eq!(record.data.name, "Bessie");
    }
}
