//! Field-work reminders tied to a crop.

use super::{missing_owner, wire, Entity, EntityKind, Link, LocalId, ServerId};
use crate::error::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderType {
    Spraying,
    Irrigation,
    Fertilizer,
    Harvesting,
    #[default]
    Other,
}

impl ReminderType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spraying => "spraying",
            Self::Irrigation => "irrigation",
            Self::Fertilizer => "fertilizer",
            Self::Harvesting => "harvesting",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ReminderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub crop_id: LocalId,
    #[serde(default)]
    pub crop_server_id: Option<ServerId>,
    pub reminder_type: ReminderType,
    pub scheduled_date: NaiveDate,
    #[serde(default)]
    pub repeat: bool,
    #[serde(default)]
    pub is_done: bool,
    #[serde(default)]
    pub notes: String,
}

impl Reminder {
    pub fn new(crop_id: LocalId, reminder_type: ReminderType, scheduled_date: NaiveDate) -> Self {
        Self {
            crop_id,
            crop_server_id: None,
            reminder_type,
            scheduled_date,
            repeat: false,
            is_done: false,
            notes: String::new(),
        }
    }

    /// Open and scheduled on or before `today`.
    pub fn is_due(&self, today: NaiveDate) -> bool {
        !self.is_done && self.scheduled_date <= today
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReminderPatch {
    pub reminder_type: Option<ReminderType>,
    pub scheduled_date: Option<NaiveDate>,
    pub repeat: Option<bool>,
    pub is_done: Option<bool>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderWire {
    #[serde(deserialize_with = "wire::owner")]
    pub crop_id: ServerId,
    #[serde(default)]
    pub reminder_type: ReminderType,
    #[serde(deserialize_with = "wire::day")]
    pub scheduled_date: NaiveDate,
    #[serde(default)]
    pub repeat: bool,
    #[serde(default)]
    pub is_done: bool,
    #[serde(default)]
    pub notes: String,
}

impl Entity for Reminder {
    const KIND: EntityKind = EntityKind::Reminder;
    type Patch = ReminderPatch;
    type Wire = ReminderWire;

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn apply(&mut self, patch: ReminderPatch) {
        if let Some(reminder_type) = patch.reminder_type {
            self.reminder_type = reminder_type;
        }
        if let Some(day) = patch.scheduled_date {
            self.scheduled_date = day;
        }
        if let Some(repeat) = patch.repeat {
            self.repeat = repeat;
        }
        if let Some(done) = patch.is_done {
            self.is_done = done;
        }
        if let Some(notes) = patch.notes {
            self.notes = notes;
        }
    }

    fn link(&self) -> Option<Link> {
        Some(Link::new(self.crop_id, self.crop_server_id.clone()))
    }

    fn set_owner_server_id(&mut self, server_id: Option<ServerId>) {
        self.crop_server_id = server_id;
    }

    fn day(&self) -> Option<NaiveDate> {
        Some(self.scheduled_date)
    }

    fn category(&self) -> Option<String> {
        Some(self.reminder_type.as_str().to_string())
    }

    fn to_wire(&self, owner: Option<&ServerId>) -> Option<ReminderWire> {
        Some(ReminderWire {
            crop_id: owner?.clone(),
            reminder_type: self.reminder_type,
            scheduled_date: self.scheduled_date,
            repeat: self.repeat,
            is_done: self.is_done,
            notes: self.notes.clone(),
        })
    }

    fn wire_owner(wire: &ReminderWire) -> Option<&ServerId> {
        Some(&wire.crop_id)
    }

    fn from_wire(wire: ReminderWire, owner: Option<Link>) -> Result<Self> {
        let owner = owner.ok_or_else(|| missing_owner(Self::KIND))?;
        Ok(Self {
            crop_id: owner.owner,
            crop_server_id: Some(wire.crop_id),
            reminder_type: wire.reminder_type,
            scheduled_date: wire.scheduled_date,
            repeat: wire.repeat,
            is_done: wire.is_done,
            notes: wire.notes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn due_only_when_open_and_scheduled() {
        let day = |d| NaiveDate::from_ymd_opt(2024, 7, d).unwrap();
        let mut reminder = Reminder::new(LocalId::new(1), ReminderType::Spraying, day(10));
        assert!(!reminder.is_due(day(9)));
        assert!(reminder.is_due(day(10)));
        reminder.apply(ReminderPatch {
            is_done: Some(true),
            ..Default::default()
        });
        assert!(!reminder.is_due(day(11)));
    }

    #[test]
    fn wire_defaults_unknown_fields() {
        let wire: ReminderWire = serde_json::from_value(json!({
            "crop_id": "c1",
            "scheduled_date": "2024-07-10T00:00:00Z",
        }))
        .unwrap();
        assert_eq!(wire.reminder_type, ReminderType::Other);
        assert!(!wire.repeat);
        assert!(!wire.is_done);
    }
}
