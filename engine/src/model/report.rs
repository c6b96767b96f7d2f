//! Daily production reports, one per animal per day.

use super::{missing_owner, require_amount, wire, Entity, EntityKind, Link, LocalId, ServerId};
use crate::error::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// Local id of the owning animal
    pub animal_id: LocalId,
    /// Server id of the owning animal, once the animal has been pushed
    #[serde(default)]
    pub animal_server_id: Option<ServerId>,
    pub date: NaiveDate,
    /// Litres
    #[serde(default)]
    pub milk: f64,
    /// Kilograms
    #[serde(default)]
    pub feed: f64,
    #[serde(default)]
    pub notes: String,
}

impl Report {
    pub fn new(animal_id: LocalId, date: NaiveDate) -> Self {
        Self {
            animal_id,
            animal_server_id: None,
            date,
            milk: 0.0,
            feed: 0.0,
            notes: String::new(),
        }
    }

    #[must_use]
    pub fn with_milk(mut self, milk: f64) -> Self {
        self.milk = milk;
        self
    }

    #[must_use]
    pub fn with_feed(mut self, feed: f64) -> Self {
        self.feed = feed;
        self
    }

    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

/// Reports never move between animals, so the owner is not patchable.
#[derive(Debug, Clone, Default)]
pub struct ReportPatch {
    pub date: Option<NaiveDate>,
    pub milk: Option<f64>,
    pub feed: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportWire {
    #[serde(deserialize_with = "wire::owner")]
    pub animal_id: ServerId,
    #[serde(deserialize_with = "wire::day")]
    pub date: NaiveDate,
    #[serde(default)]
    pub milk: f64,
    #[serde(default)]
    pub feed: f64,
    #[serde(default)]
    pub notes: String,
}

impl Entity for Report {
    const KIND: EntityKind = EntityKind::Report;
    type Patch = ReportPatch;
    type Wire = ReportWire;

    fn validate(&self) -> Result<()> {
        require_amount(Self::KIND, "milk", self.milk)?;
        require_amount(Self::KIND, "feed", self.feed)
    }

    fn apply(&mut self, patch: ReportPatch) {
        if let Some(date) = patch.date {
            self.date = date;
        }
        if let Some(milk) = patch.milk {
            self.milk = milk;
        }
        if let Some(feed) = patch.feed {
            self.feed = feed;
        }
        if let Some(notes) = patch.notes {
            self.notes = notes;
        }
    }

    fn link(&self) -> Option<Link> {
        Some(Link::new(self.animal_id, self.animal_server_id.clone()))
    }

    fn set_owner_server_id(&mut self, server_id: Option<ServerId>) {
        self.animal_server_id = server_id;
    }

    fn day(&self) -> Option<NaiveDate> {
        Some(self.date)
    }

    fn to_wire(&self, owner: Option<&ServerId>) -> Option<ReportWire> {
        Some(ReportWire {
            animal_id: owner?.clone(),
            date: self.date,
            milk: self.milk,
            feed: self.feed,
            notes: self.notes.clone(),
        })
    }

    fn wire_owner(wire: &ReportWire) -> Option<&ServerId> {
        Some(&wire.animal_id)
    }

    fn from_wire(wire: ReportWire, owner: Option<Link>) -> Result<Self> {
        let owner = owner.ok_or_else(|| missing_owner(Self::KIND))?;
        Ok(Self {
            animal_id: owner.owner,
            animal_server_id: Some(wire.animal_id),
            date: wire.date,
            milk: wire.milk,
            feed: wire.feed,
            notes: wire.notes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn june_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn deferred_without_owner_server_id() {
        let report = Report::new(LocalId::new(1), june_first()).with_milk(12.0);
        assert!(report.to_wire(None).is_none());

        let wire = report.to_wire(Some(&ServerId::from("a1"))).unwrap();
        assert_eq!(
            serde_json::to_value(&wire).unwrap(),
            json!({
                "animalId": "a1",
                "date": "2024-06-01",
                "milk": 12.0,
                "feed": 0.0,
                "notes": "",
            })
        );
    }

    #[test]
    fn from_server_record_with_populated_animal() {
        let wire: ReportWire = serde_json::from_value(json!({
            "animalId": {"_id": "a1", "name": "Bessie"},
            "date": "2024-06-01T00:00:00.000Z",
            "milk": 9.5,
        }))
        .unwrap();
        let owner = Link::new(LocalId::new(4), Some(ServerId::from("a1")));
        let report = Report::from_wire(wire, Some(owner)).unwrap();

        assert_eq!(report.animal_id, LocalId::new(4));
        assert_eq!(report.animal_server_id, Some(ServerId::from("a1")));
        assert_eq!(report.date, june_first());
        assert_eq!(report.milk, 9.5);
        assert_eq!(report.feed, 0.0);
    }

    #[test]
    fn from_wire_requires_owner() {
        let wire = ReportWire {
            animal_id: ServerId::from("a1"),
            date: june_first(),
            milk: 1.0,
            feed: 1.0,
            notes: String::new(),
        };
        assert!(Report::from_wire(wire, None).is_err());
    }

    #[test]
    fn negative_measurements_rejected() {
        let report = Report::new(LocalId::new(1), june_first()).with_feed(-3.0);
        assert!(report.validate().is_err());
    }
}
