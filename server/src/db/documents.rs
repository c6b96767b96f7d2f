//! Database operations for the documents table.

use chrono::{DateTime, SecondsFormat, Utc};
use paddock_engine::EntityKind;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::Pool;

const COLUMNS: &str = "collection, id, owner_id, day, body, created_at, updated_at";

/// A stored document row from the database.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub collection: String,
    pub id: String,
    pub owner_id: Option<String>,
    pub day: Option<String>,
    pub body: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredDocument {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(StoredDocument {
            collection: row.try_get("collection")?,
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            day: row.try_get("day")?,
            body: row.try_get("body")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StoredDocument {
    /// The client-supplied fields, without identity or timestamps.
    pub fn fields(&self) -> Result<Map<String, Value>, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    /// The document as the API returns it.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        let mut doc = self.fields()?;
        doc.insert("_id".into(), Value::String(self.id.clone()));
        doc.insert("createdAt".into(), timestamp(self.created_at));
        doc.insert("updatedAt".into(), timestamp(self.updated_at));
        Ok(Value::Object(doc))
    }
}

fn timestamp(millis: i64) -> Value {
    let at = DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default();
    Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Values copied out of a body for filtering and the daily report rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentIndex {
    pub owner_id: Option<String>,
    /// `YYYY-MM-DD`
    pub day: Option<String>,
}

/// List filter; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub owner_id: Option<String>,
    pub day: Option<String>,
}

/// True when `err` comes from a unique index.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Insert a new document.
pub async fn insert_document(
    pool: &Pool,
    collection: &str,
    id: &str,
    index: &DocumentIndex,
    body: &Map<String, Value>,
) -> Result<StoredDocument, sqlx::Error> {
    let now = Utc::now().timestamp_millis();
    let body = serde_json::to_string(body).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    sqlx::query_as::<_, StoredDocument>(&format!(
        "INSERT INTO documents ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING {COLUMNS}"
    ))
    .bind(collection)
    .bind(id)
    .bind(&index.owner_id)
    .bind(&index.day)
    .bind(body)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
}

/// Replace a document's body, keeping its creation time.
pub async fn replace_document(
    pool: &Pool,
    collection: &str,
    id: &str,
    index: &DocumentIndex,
    body: &Map<String, Value>,
) -> Result<Option<StoredDocument>, sqlx::Error> {
    let body = serde_json::to_string(body).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    sqlx::query_as::<_, StoredDocument>(&format!(
        "UPDATE documents SET owner_id = ?, day = ?, body = ?, updated_at = ?
         WHERE collection = ? AND id = ?
         RETURNING {COLUMNS}"
    ))
    .bind(&index.owner_id)
    .bind(&index.day)
    .bind(body)
    .bind(Utc::now().timestamp_millis())
    .bind(collection)
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Get a document by collection and ID.
pub async fn get_document(
    pool: &Pool,
    collection: &str,
    id: &str,
) -> Result<Option<StoredDocument>, sqlx::Error> {
    sqlx::query_as::<_, StoredDocument>(&format!(
        "SELECT {COLUMNS} FROM documents WHERE collection = ? AND id = ?"
    ))
    .bind(collection)
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn document_exists(pool: &Pool, collection: &str, id: &str) -> Result<bool, sqlx::Error> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

/// Documents of a collection in creation order.
pub async fn list_documents(
    pool: &Pool,
    collection: &str,
    filter: &DocumentFilter,
) -> Result<Vec<StoredDocument>, sqlx::Error> {
    sqlx::query_as::<_, StoredDocument>(&format!(
        "SELECT {COLUMNS} FROM documents
         WHERE collection = ?
           AND (? IS NULL OR owner_id = ?)
           AND (? IS NULL OR day = ?)
         ORDER BY created_at, rowid"
    ))
    .bind(collection)
    .bind(&filter.owner_id)
    .bind(&filter.owner_id)
    .bind(&filter.day)
    .bind(&filter.day)
    .fetch_all(pool)
    .await
}

/// Delete a document and apply the owner deletion policy to its dependents:
/// required links are deleted, optional links are cleared.
///
/// Returns `false` when the document did not exist.
pub async fn delete_document(pool: &Pool, kind: EntityKind, id: &str) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let deleted = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
        .bind(kind.path())
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Ok(false);
    }

    for dependent in kind.dependents() {
        if dependent.link_required() {
            let removed = sqlx::query("DELETE FROM documents WHERE collection = ? AND owner_id = ?")
                .bind(dependent.path())
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            tracing::debug!(collection = dependent.path(), owner = id, removed, "cascaded delete");
        } else if let Some(field) = dependent.owner_field() {
            let detached = sqlx::query(
                "UPDATE documents
                 SET owner_id = NULL, body = json_remove(body, ?), updated_at = ?
                 WHERE collection = ? AND owner_id = ?",
            )
            .bind(format!("$.{field}"))
            .bind(Utc::now().timestamp_millis())
            .bind(dependent.path())
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            tracing::debug!(collection = dependent.path(), owner = id, detached, "detached from owner");
        }
    }

    tx.commit().await?;
    Ok(true)
}
