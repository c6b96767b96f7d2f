//! In-process stand-in for the farm server.

use super::{ListFilter, Remote};
use crate::error::{RemoteError, RemoteResult};
use crate::model::{wire::parse_day, EntityKind, ServerId};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Number of calls made against a [`MemoryRemote`], reachable or not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub list: usize,
    pub create: usize,
    pub update: usize,
    pub delete: usize,
}

impl CallCounts {
    /// Calls that write.
    pub fn writes(&self) -> usize {
        self.create + self.update + self.delete
    }

    pub fn total(&self) -> usize {
        self.list + self.writes()
    }
}

#[derive(Debug)]
struct State {
    reachable: bool,
    collections: HashMap<EntityKind, Vec<Map<String, Value>>>,
    rejections: HashMap<EntityKind, (u16, String)>,
    calls: HashMap<EntityKind, CallCounts>,
}

/// A server double that keeps collections in memory.
///
/// It behaves like the farm server where the engine cares: server ids are
/// assigned on create, a second report for the same animal and day is a
/// `409`, and unknown ids are a `404`. It can also be taken offline or told
/// to reject a kind.
#[derive(Debug)]
pub struct MemoryRemote {
    state: Mutex<State>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                reachable: true,
                collections: HashMap::new(),
                rejections: HashMap::new(),
                calls: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every call fail with a network error (or stop doing so).
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Answer every write to `kind` with an API error.
    pub fn reject(&self, kind: EntityKind, status: u16, message: impl Into<String>) {
        self.lock().rejections.insert(kind, (status, message.into()));
    }

    /// Stop rejecting `kind`.
    pub fn accept(&self, kind: EntityKind) {
        self.lock().rejections.remove(&kind);
    }

    /// Calls made for one kind.
    pub fn calls(&self, kind: EntityKind) -> CallCounts {
        self.lock().calls.get(&kind).copied().unwrap_or_default()
    }

    /// Calls made across every kind.
    pub fn total_calls(&self) -> CallCounts {
        self.lock()
            .calls
            .values()
            .fold(CallCounts::default(), |acc, c| CallCounts {
                list: acc.list + c.list,
                create: acc.create + c.create,
                update: acc.update + c.update,
                delete: acc.delete + c.delete,
            })
    }

    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }

    /// Snapshot of a collection, in creation order.
    pub fn records(&self, kind: EntityKind) -> Vec<Value> {
        self.lock()
            .collections
            .get(&kind)
            .map(|docs| docs.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    pub fn record(&self, kind: EntityKind, server_id: &ServerId) -> Option<Value> {
        let state = self.lock();
        let docs = state.collections.get(&kind)?;
        position(docs, server_id).map(|i| Value::Object(docs[i].clone()))
    }

    /// Write a record directly, as another device would have. Not counted.
    pub fn seed(&self, kind: EntityKind, body: Value) -> ServerId {
        let mut state = self.lock();
        let doc = stamp(body);
        let id = doc_id(&doc);
        state.collections.entry(kind).or_default().push(doc);
        id
    }

    /// Merge fields into a stored record directly, as another device would. Not counted.
    pub fn edit(&self, kind: EntityKind, server_id: &ServerId, fields: Value) -> bool {
        let mut state = self.lock();
        let Some(docs) = state.collections.get_mut(&kind) else {
            return false;
        };
        match position(docs, server_id) {
            Some(i) => {
                merge(&mut docs[i], fields);
                true
            }
            None => false,
        }
    }

    fn begin(&self, kind: EntityKind, count: impl FnOnce(&mut CallCounts)) -> RemoteResult<MutexGuard<'_, State>> {
        let mut state = self.lock();
        count(state.calls.entry(kind).or_default());
        if !state.reachable {
            return Err(RemoteError::Network("server unreachable".into()));
        }
        Ok(state)
    }
}

fn position(docs: &[Map<String, Value>], server_id: &ServerId) -> Option<usize> {
    docs.iter()
        .position(|doc| doc.get("_id").and_then(Value::as_str) == Some(server_id.as_str()))
}

fn doc_id(doc: &Map<String, Value>) -> ServerId {
    ServerId::from(doc.get("_id").and_then(Value::as_str).unwrap_or_default())
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Give a new body its identity and timestamps.
fn stamp(body: Value) -> Map<String, Value> {
    let mut doc = match body {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let id = Uuid::new_v4().simple().to_string();
    doc.insert("_id".into(), Value::String(id));
    doc.insert("createdAt".into(), now());
    doc.insert("updatedAt".into(), now());
    doc
}

fn merge(doc: &mut Map<String, Value>, fields: Value) {
    if let Value::Object(fields) = fields {
        for (key, value) in fields {
            if key != "_id" && key != "createdAt" {
                doc.insert(key, value);
            }
        }
    }
    doc.insert("updatedAt".into(), now());
}

fn day_of(doc: &Map<String, Value>, field: &str) -> Option<String> {
    let raw = doc.get(field)?.as_str()?;
    parse_day(raw).ok().map(|day| day.to_string())
}

fn matches(doc: &Map<String, Value>, kind: EntityKind, filter: &ListFilter) -> bool {
    if let (Some(field), Some(owner)) = (kind.owner_field(), &filter.owner) {
        if doc.get(field).and_then(Value::as_str) != Some(owner.as_str()) {
            return false;
        }
    }
    if let Some(day) = filter.day {
        if day_of(doc, "date") != Some(day.to_string()) {
            return false;
        }
    }
    true
}

/// The daily-slot rule, checked the way the farm server checks it.
fn slot_taken(docs: &[Map<String, Value>], body: &Map<String, Value>, except: Option<&ServerId>) -> bool {
    let owner = body.get("animalId").and_then(Value::as_str);
    let day = day_of(body, "date");
    docs.iter().any(|doc| {
        except.map_or(true, |id| doc_id(doc) != *id)
            && doc.get("animalId").and_then(Value::as_str) == owner
            && day_of(doc, "date") == day
    })
}

#[async_trait]
impl Remote for MemoryRemote {
    async fn list(&self, kind: EntityKind, filter: &ListFilter) -> RemoteResult<Vec<Value>> {
        let state = self.begin(kind, |c| c.list += 1)?;
        Ok(state
            .collections
            .get(&kind)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| matches(doc, kind, filter))
                    .cloned()
                    .map(Value::Object)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create(&self, kind: EntityKind, body: Value) -> RemoteResult<Value> {
        let mut state = self.begin(kind, |c| c.create += 1)?;
        if let Some((status, message)) = state.rejections.get(&kind) {
            return Err(RemoteError::Api {
                status: *status,
                message: message.clone(),
            });
        }

        let doc = stamp(body);
        let docs = state.collections.entry(kind).or_default();
        if kind.unique_daily() && slot_taken(docs, &doc, None) {
            return Err(RemoteError::Api {
                status: 409,
                message: "Report already exists for this animal on this date".into(),
            });
        }
        docs.push(doc.clone());
        Ok(Value::Object(doc))
    }

    async fn update(&self, kind: EntityKind, server_id: &ServerId, body: Value) -> RemoteResult<Value> {
        let mut state = self.begin(kind, |c| c.update += 1)?;
        if let Some((status, message)) = state.rejections.get(&kind) {
            return Err(RemoteError::Api {
                status: *status,
                message: message.clone(),
            });
        }

        let docs = state.collections.entry(kind).or_default();
        let index = position(docs, server_id).ok_or_else(|| RemoteError::Api {
            status: 404,
            message: format!("{kind} not found"),
        })?;
        let mut doc = docs[index].clone();
        merge(&mut doc, body);
        if kind.unique_daily() && slot_taken(docs, &doc, Some(server_id)) {
            return Err(RemoteError::Api {
                status: 409,
                message: "Report already exists for this animal on this date".into(),
            });
        }
        docs[index] = doc.clone();
        Ok(Value::Object(doc))
    }

    async fn delete(&self, kind: EntityKind, server_id: &ServerId) -> RemoteResult<()> {
        let mut state = self.begin(kind, |c| c.delete += 1)?;
        let docs = state.collections.entry(kind).or_default();
        let index = position(docs, server_id).ok_or_else(|| RemoteError::Api {
            status: 404,
            message: format!("{kind} not found"),
        })?;
        docs.remove(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_assigns_ids_and_timestamps() {
        let remote = MemoryRemote::new();
        let record = remote
            .create(EntityKind::Animal, json!({"name": "Bessie", "type": "cow"}))
            .await
            .unwrap();
        assert!(record["_id"].as_str().is_some_and(|id| !id.is_empty()));
        assert!(record["createdAt"].is_string());
        assert_eq!(remote.records(EntityKind::Animal).len(), 1);
        assert_eq!(remote.calls(EntityKind::Animal).create, 1);
    }

    #[tokio::test]
    async fn duplicate_report_is_a_conflict() {
        let remote = MemoryRemote::new();
        let body = json!({"animalId": "a1", "date": "2024-06-01", "milk": 12.0});
        remote.create(EntityKind::Report, body).await.unwrap();

        let err = remote
            .create(
                EntityKind::Report,
                json!({"animalId": "a1", "date": "2024-06-01T00:00:00.000Z"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Api { status: 409, .. }));

        remote
            .create(EntityKind::Report, json!({"animalId": "a2", "date": "2024-06-01"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unreachable_and_rejecting() {
        let remote = MemoryRemote::new();
        remote.set_reachable(false);
        let err = remote
            .list(EntityKind::Crop, &ListFilter::default())
            .await
            .unwrap_err();
        assert!(err.is_network());
        assert_eq!(remote.calls(EntityKind::Crop).list, 1);

        remote.set_reachable(true);
        remote.reject(EntityKind::Crop, 400, "crop_name is required");
        let err = remote
            .create(EntityKind::Crop, json!({}))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RemoteError::Api {
                status: 400,
                message: "crop_name is required".into()
            }
        );
        remote.accept(EntityKind::Crop);
        assert!(remote.create(EntityKind::Crop, json!({"crop_name": "Rice"})).await.is_ok());
        assert_eq!(remote.total_calls().writes(), 2);
    }

    #[tokio::test]
    async fn update_merges_and_missing_ids_are_not_found() {
        let remote = MemoryRemote::new();
        let id = remote.seed(EntityKind::Animal, json!({"name": "Bessie", "type": "cow"}));
        let updated = remote
            .update(EntityKind::Animal, &id, json!({"age": 5.0}))
            .await
            .unwrap();
        assert_eq!(updated["name"], "Bessie");
        assert_eq!(updated["age"], 5.0);

        let err = remote
            .delete(EntityKind::Animal, &ServerId::from("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Api { status: 404, .. }));
    }

    #[tokio::test]
    async fn list_filters_by_owner_and_day() {
        let remote = MemoryRemote::new();
        remote.seed(EntityKind::Report, json!({"animalId": "a1", "date": "2024-06-01"}));
        remote.seed(EntityKind::Report, json!({"animalId": "a1", "date": "2024-06-02"}));
        remote.seed(EntityKind::Report, json!({"animalId": "a2", "date": "2024-06-01"}));

        let filter = ListFilter::default().owner("a1");
        assert_eq!(remote.list(EntityKind::Report, &filter).await.unwrap().len(), 2);

        let filter = filter.day(chrono::NaiveDate::from_ymd_opt(2024, 6, 2).unwrap());
        assert_eq!(remote.list(EntityKind::Report, &filter).await.unwrap().len(), 1);
    }
}
