//! Resource handlers - CRUD over one collection per entity kind.
//!
//! Bodies are checked with the engine's own wire types and record rules, so
//! the server accepts exactly what a device could have produced.

use crate::db::{self, DocumentFilter, DocumentIndex, Pool, StoredDocument};
use crate::error::{AppError, Result};
use paddock_engine::{with_entity, Entity, EntityKind, Link, LocalId};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Keys the server owns; ignored when a client sends them.
const RESERVED: [&str; 3] = ["_id", "createdAt", "updatedAt"];

/// Resolve a URL segment to an entity kind.
pub fn collection_kind(collection: &str) -> Result<EntityKind> {
    EntityKind::from_path(collection)
        .ok_or_else(|| AppError::NotFound(format!("unknown collection: {collection}")))
}

/// List a collection, filtered by owner (`animalId` / `crop_id` /
/// `current_crop_id`) and `date` query parameters.
pub async fn list_documents(
    pool: &Pool,
    kind: EntityKind,
    params: &HashMap<String, String>,
) -> Result<Vec<Value>> {
    let owner_id = kind
        .owner_field()
        .and_then(|field| params.get(field))
        .cloned();
    let day = params
        .get("date")
        .map(|raw| parse_day(raw))
        .transpose()?;

    let filter = DocumentFilter { owner_id, day };
    let documents = db::list_documents(pool, kind.path(), &filter).await?;
    documents.iter().map(render).collect()
}

/// Validate and store a new document.
pub async fn create_document(pool: &Pool, kind: EntityKind, body: Value) -> Result<Value> {
    let fields = client_fields(body)?;
    let index = check(pool, kind, &fields).await?;

    let id = Uuid::new_v4().to_string();
    let stored = db::insert_document(pool, kind.path(), &id, &index, &fields)
        .await
        .map_err(|err| write_error(kind, err))?;
    tracing::debug!(collection = kind.path(), id = %stored.id, "created");
    render(&stored)
}

/// Merge the sent keys into a stored document, then validate the result.
pub async fn update_document(pool: &Pool, kind: EntityKind, id: &str, body: Value) -> Result<Value> {
    let existing = db::get_document(pool, kind.path(), id)
        .await?
        .ok_or_else(|| not_found(kind, id))?;

    let mut fields = existing
        .fields()
        .map_err(|err| AppError::Internal(format!("stored {kind} {id} is corrupt: {err}")))?;
    fields.extend(client_fields(body)?);
    let index = check(pool, kind, &fields).await?;

    let stored = db::replace_document(pool, kind.path(), id, &index, &fields)
        .await
        .map_err(|err| write_error(kind, err))?
        .ok_or_else(|| not_found(kind, id))?;
    tracing::debug!(collection = kind.path(), id, "updated");
    render(&stored)
}

/// Delete a document together with its dependents.
pub async fn delete_document(pool: &Pool, kind: EntityKind, id: &str) -> Result<Value> {
    if !db::delete_document(pool, kind, id).await? {
        return Err(not_found(kind, id));
    }
    tracing::debug!(collection = kind.path(), id, "deleted");
    Ok(serde_json::json!({ "message": format!("{kind} deleted") }))
}

fn render(document: &StoredDocument) -> Result<Value> {
    document.to_json().map_err(|err| {
        AppError::Internal(format!(
            "stored {} {} is corrupt: {err}",
            document.collection, document.id
        ))
    })
}

fn not_found(kind: EntityKind, id: &str) -> AppError {
    AppError::NotFound(format!("{kind} not found: {id}"))
}

fn write_error(kind: EntityKind, err: sqlx::Error) -> AppError {
    if kind.unique_daily() && db::is_unique_violation(&err) {
        AppError::Conflict("Report already exists for this animal on this date".into())
    } else {
        AppError::Database(err)
    }
}

fn parse_day(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let day = raw.get(..10).unwrap_or(raw);
    chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map(|day| day.to_string())
        .map_err(|_| AppError::BadRequest(format!("not a calendar day: {raw:?}")))
}

fn client_fields(body: Value) -> Result<Map<String, Value>> {
    let Value::Object(mut fields) = body else {
        return Err(AppError::BadRequest("body must be a JSON object".into()));
    };
    for key in RESERVED {
        fields.remove(key);
    }
    Ok(fields)
}

/// Apply the record rules and make sure the owner exists.
async fn check(pool: &Pool, kind: EntityKind, fields: &Map<String, Value>) -> Result<DocumentIndex> {
    let index = with_entity!(kind, E => index_of::<E>(fields)?);
    if let (Some(owner_kind), Some(owner_id)) = (kind.owner(), &index.owner_id) {
        if !db::document_exists(pool, owner_kind.path(), owner_id).await? {
            return Err(AppError::BadRequest(format!("unknown {owner_kind}: {owner_id}")));
        }
    }
    Ok(index)
}

/// Decode `fields` as a `E` wire record and run `E`'s field rules.
fn index_of<E: Entity>(fields: &Map<String, Value>) -> Result<DocumentIndex> {
    let wire: E::Wire = serde_json::from_value(Value::Object(fields.clone()))
        .map_err(|err| AppError::BadRequest(format!("invalid {}: {err}", E::KIND)))?;
    let owner = E::wire_owner(&wire).cloned();

    // The owner's local id means nothing here; only its presence matters.
    let link = owner
        .clone()
        .map(|server_id| Link::new(LocalId::new(0), Some(server_id)));
    let data = E::from_wire(wire, link)?;
    data.validate()?;

    Ok(DocumentIndex {
        owner_id: owner.map(|server_id| server_id.as_str().to_owned()),
        day: data.day().map(|day| day.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use paddock_engine::Report;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        client_fields(value).unwrap()
    }

    #[test]
    fn reserved_keys_are_dropped() {
        let fields = fields(json!({"_id": "x", "createdAt": "now", "name": "Bessie"}));
        assert_eq!(fields.len(), 1);
        assert!(fields.contains_key("name"));
    }

    #[test]
    fn report_index_normalizes_the_day() {
        let index = index_of::<Report>(&fields(json!({
            "animalId": {"_id": "a1", "name": "Bessie"},
            "date": "2024-06-01T00:00:00.000Z",
            "milk": 12
        })))
        .unwrap();
        assert_eq!(index.owner_id.as_deref(), Some("a1"));
        assert_eq!(index.day.as_deref(), Some("2024-06-01"));
    }

    #[test]
    fn report_without_animal_is_rejected() {
        let err = index_of::<Report>(&fields(json!({"date": "2024-06-01"}))).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_) | AppError::Engine(_)));
    }

    #[test]
    fn query_days_accept_timestamps() {
        assert_eq!(parse_day("2024-06-01T10:00:00Z").unwrap(), "2024-06-01");
        assert!(parse_day("June").is_err());
    }
}
