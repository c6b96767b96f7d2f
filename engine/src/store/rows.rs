//! Row mapping between the per-kind tables and [`Record<T>`].

use crate::error::{Error, Result};
use crate::model::{Entity, EntityKind, LocalId, Record, ServerId};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub(crate) const COLUMNS: &str = "local_id, server_id, synced, revision, created_at, payload";

/// A stored row, before the payload is decoded into its kind.
#[derive(Debug)]
pub(crate) struct StoredRow {
    pub local_id: LocalId,
    pub server_id: Option<ServerId>,
    pub synced: bool,
    pub revision: i64,
    pub created_at: i64,
    pub payload: String,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredRow {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredRow {
            local_id: row.try_get("local_id")?,
            server_id: row.try_get("server_id")?,
            synced: row.try_get("synced")?,
            revision: row.try_get("revision")?,
            created_at: row.try_get("created_at")?,
            payload: row.try_get("payload")?,
        })
    }
}

impl StoredRow {
    pub fn into_record<E: Entity>(self) -> Result<Record<E>> {
        Ok(Record {
            local_id: self.local_id,
            server_id: self.server_id,
            synced: self.synced,
            revision: self.revision,
            created_at: from_millis(self.created_at),
            data: serde_json::from_str(&self.payload)?,
        })
    }
}

/// The derived columns every table indexes, computed from the typed fields.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IndexColumns {
    pub owner_id: Option<LocalId>,
    pub day: Option<String>,
    pub category: Option<String>,
    pub payload: String,
}

impl IndexColumns {
    pub fn of<E: Entity>(data: &E) -> Result<Self> {
        Ok(Self {
            owner_id: data.link().map(|link| link.owner),
            day: data.day().map(day_key),
            category: data.category(),
            payload: serde_json::to_string(data)?,
        })
    }
}

pub(crate) fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Which unique constraint a write tripped, if any.
pub(crate) enum Violation {
    ServerId,
    Slot,
}

pub(crate) fn unique_violation(err: &sqlx::Error) -> Option<Violation> {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            if db.message().contains("server_id") {
                Some(Violation::ServerId)
            } else {
                Some(Violation::Slot)
            }
        }
        _ => None,
    }
}

/// Map a failed write on a record of `kind` to the domain error it stands for.
pub(crate) fn write_error(
    kind: EntityKind,
    server_id: Option<&ServerId>,
    err: sqlx::Error,
) -> Error {
    match (unique_violation(&err), server_id) {
        (Some(Violation::ServerId), Some(server_id)) => Error::IdentityConflict {
            kind,
            server_id: server_id.clone(),
        },
        (Some(Violation::Slot), _) => Error::DuplicateRecord {
            kind,
            reason: "a record already occupies this owner and day".into(),
        },
        _ => Error::Database(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Animal, AnimalType, Report};

    #[test]
    fn index_columns_follow_the_fields() {
        let report = Report::new(LocalId::new(5), NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        let columns = IndexColumns::of(&report).unwrap();
        assert_eq!(columns.owner_id, Some(LocalId::new(5)));
        assert_eq!(columns.day.as_deref(), Some("2024-06-01"));
        assert_eq!(columns.category, None);

        let animal = Animal::new("Bessie", AnimalType::Buffalo);
        let columns = IndexColumns::of(&animal).unwrap();
        assert_eq!(columns.owner_id, None);
        assert_eq!(columns.category.as_deref(), Some("buffalo"));
    }

    #[test]
    fn millis_round_trip() {
        let now = Utc::now();
        assert_eq!(from_millis(to_millis(now)).timestamp_millis(), now.timestamp_millis());
    }
}
