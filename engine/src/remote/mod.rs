//! Remote client: the request/response boundary to the farm server.
//!
//! A [`Remote`] speaks JSON per collection and keeps no state of its own; it
//! never retries. Every failure means "this attempt did not happen".

mod http;
mod memory;

pub use http::HttpRemote;
pub use memory::{CallCounts, MemoryRemote};

use crate::error::{RemoteError, RemoteResult};
use crate::model::{Entity, EntityKind, ServerId};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server-side filter for a collection listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Only records owned by this server id
    pub owner: Option<ServerId>,
    /// Only records on this day
    pub day: Option<NaiveDate>,
}

impl ListFilter {
    pub fn owner(mut self, owner: impl Into<ServerId>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn day(mut self, day: NaiveDate) -> Self {
        self.day = Some(day);
        self
    }

    /// Query parameters for `kind`. Kinds without an owner ignore `owner`.
    pub fn params(&self, kind: EntityKind) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let (Some(field), Some(owner)) = (kind.owner_field(), &self.owner) {
            params.push((field, owner.to_string()));
        }
        if let Some(day) = self.day {
            params.push(("date", day.format("%Y-%m-%d").to_string()));
        }
        params
    }
}

/// The REST surface of the farm server, one collection per [`EntityKind`].
#[async_trait]
pub trait Remote: Send + Sync {
    async fn list(&self, kind: EntityKind, filter: &ListFilter) -> RemoteResult<Vec<Value>>;

    /// Create a record; the response is the full server record.
    async fn create(&self, kind: EntityKind, body: Value) -> RemoteResult<Value>;

    async fn update(&self, kind: EntityKind, server_id: &ServerId, body: Value) -> RemoteResult<Value>;

    async fn delete(&self, kind: EntityKind, server_id: &ServerId) -> RemoteResult<()>;
}

/// A record as the server returns it: its identity plus the wire fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord<W> {
    #[serde(rename = "_id")]
    pub id: ServerId,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: W,
}

/// Decode one server record.
pub fn decode<W: DeserializeOwned>(value: Value) -> RemoteResult<RemoteRecord<W>> {
    serde_json::from_value(value).map_err(|err| RemoteError::Decode(err.to_string()))
}

/// Best-effort server id of an undecodable record, for reporting.
pub(crate) fn raw_id(value: &Value) -> Option<ServerId> {
    value
        .get("_id")
        .and_then(Value::as_str)
        .map(ServerId::from)
}

/// Create `wire` as a record of kind `E`.
pub async fn create<E: Entity>(
    remote: &dyn Remote,
    wire: &E::Wire,
) -> RemoteResult<RemoteRecord<E::Wire>> {
    let body = encode(wire)?;
    decode(remote.create(E::KIND, body).await?)
}

/// Replace the fields of record `server_id` of kind `E`.
pub async fn update<E: Entity>(
    remote: &dyn Remote,
    server_id: &ServerId,
    wire: &E::Wire,
) -> RemoteResult<RemoteRecord<E::Wire>> {
    let body = encode(wire)?;
    decode(remote.update(E::KIND, server_id, body).await?)
}

fn encode<W: Serialize>(wire: &W) -> RemoteResult<Value> {
    serde_json::to_value(wire).map_err(|err| RemoteError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Animal, AnimalType, ReportWire};
    use serde_json::json;

    #[test]
    fn decodes_server_record_and_ignores_extras() {
        let record: RemoteRecord<Animal> = decode(json!({
            "_id": "665f1c",
            "name": "Bessie",
            "type": "cow",
            "createdAt": "2024-06-01T08:30:00.000Z",
            "updatedAt": "2024-06-01T08:30:00.000Z",
            "__v": 0,
        }))
        .unwrap();
        assert_eq!(record.id, ServerId::from("665f1c"));
        assert!(record.created_at.is_some());
        assert_eq!(record.fields, Animal::new("Bessie", AnimalType::Cow));
    }

    #[test]
    fn missing_id_is_a_decode_error() {
        let err = decode::<ReportWire>(json!({"animalId": "a1", "date": "2024-06-01"})).unwrap_err();
        assert!(matches!(err, RemoteError::Decode(_)));
        assert_eq!(raw_id(&json!({"_id": "r1"})), Some(ServerId::from("r1")));
    }

    #[test]
    fn filter_params_use_owner_field() {
        let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let filter = ListFilter::default().owner("a1").day(day);
        assert_eq!(
            filter.params(EntityKind::Report),
            vec![("animalId", "a1".to_string()), ("date", "2024-06-01".to_string())]
        );
        assert_eq!(
            filter.params(EntityKind::Expense)[0],
            ("crop_id", "a1".to_string())
        );
        assert_eq!(filter.params(EntityKind::Animal).len(), 1);
    }
}
