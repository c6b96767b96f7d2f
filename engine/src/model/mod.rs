//! Domain records and the [`Entity`] trait that lets the store, the remote
//! client and the sync engine treat every kind the same way.
//!
//! A stored record is a [`Record<T>`]: sync bookkeeping (local id, server id,
//! `synced`, revision, creation time) wrapped around the typed fields `T`.
//! Relationships between kinds are plain foreign-key values ([`LocalId`] of the
//! owner) looked up through the store, never embedded references.

mod animal;
mod crop;
mod land;
mod reminder;
mod report;
pub(crate) mod wire;

pub use animal::{Animal, AnimalPatch, AnimalType, AttributeValue, Attributes};
pub use crop::{
    Crop, CropPatch, CropStatus, Expense, ExpenseCosts, ExpensePatch, ExpenseWire, Income,
    IncomePatch, IncomeWire,
};
pub use land::{LandPlot, LandPlotPatch, LandPlotWire};
pub use reminder::{Reminder, ReminderPatch, ReminderType, ReminderWire};
pub use report::{Report, ReportPatch, ReportWire};

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Device-local identifier, issued by the store and never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct LocalId(i64);

impl LocalId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier assigned by the server. Opaque to the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ServerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The record collections known to the engine.
///
/// [`EntityKind::ALL`] lists owners before the kinds they own; sync passes
/// walk it in that order so an owner always has its server id before its
/// dependents are pushed or merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Animal,
    Report,
    Crop,
    Expense,
    Income,
    LandPlot,
    Reminder,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Animal,
        EntityKind::Report,
        EntityKind::Crop,
        EntityKind::Expense,
        EntityKind::Income,
        EntityKind::LandPlot,
        EntityKind::Reminder,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Animal => "animal",
            Self::Report => "report",
            Self::Crop => "crop",
            Self::Expense => "expense",
            Self::Income => "income",
            Self::LandPlot => "land_plot",
            Self::Reminder => "reminder",
        }
    }

    /// Local table holding this kind.
    pub const fn table(self) -> &'static str {
        match self {
            Self::Animal => "animals",
            Self::Report => "reports",
            Self::Crop => "crops",
            Self::Expense => "expenses",
            Self::Income => "income",
            Self::LandPlot => "land_plots",
            Self::Reminder => "reminders",
        }
    }

    /// REST collection segment on the server.
    pub const fn path(self) -> &'static str {
        match self {
            Self::Animal => "animals",
            Self::Report => "reports",
            Self::Crop => "crops",
            Self::Expense => "expenses",
            Self::Income => "income",
            Self::LandPlot => "land",
            Self::Reminder => "reminders",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.path() == path)
    }

    /// Kind that owns records of this kind.
    pub const fn owner(self) -> Option<EntityKind> {
        match self {
            Self::Report => Some(Self::Animal),
            Self::Expense | Self::Income | Self::LandPlot | Self::Reminder => Some(Self::Crop),
            Self::Animal | Self::Crop => None,
        }
    }

    /// Whether a record of this kind cannot exist without its owner.
    ///
    /// Required links cascade on owner deletion; optional links are cleared.
    pub const fn link_required(self) -> bool {
        matches!(
            self,
            Self::Report | Self::Expense | Self::Income | Self::Reminder
        )
    }

    /// Kinds limited to one record per owner per day.
    pub const fn unique_daily(self) -> bool {
        matches!(self, Self::Report)
    }

    /// Wire field naming the owner's server id, used as the list filter parameter.
    pub const fn owner_field(self) -> Option<&'static str> {
        match self {
            Self::Report => Some("animalId"),
            Self::Expense | Self::Income | Self::Reminder => Some("crop_id"),
            Self::LandPlot => Some("current_crop_id"),
            Self::Animal | Self::Crop => None,
        }
    }

    /// Kinds whose owner is `self`.
    pub fn dependents(self) -> impl Iterator<Item = EntityKind> {
        Self::ALL
            .into_iter()
            .filter(move |kind| kind.owner() == Some(self))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s || kind.path() == s || kind.table() == s)
            .ok_or_else(|| format!("unknown entity kind: {s}"))
    }
}

/// A record's reference to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Owner's local id
    pub owner: LocalId,
    /// Owner's server id, when known
    pub owner_server_id: Option<ServerId>,
}

impl Link {
    pub fn new(owner: LocalId, owner_server_id: Option<ServerId>) -> Self {
        Self {
            owner,
            owner_server_id,
        }
    }
}

/// A stored record: sync bookkeeping around typed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record<T> {
    /// Assigned by the store on insert
    pub local_id: LocalId,
    /// Assigned by the server on first accepted push; never changes afterwards
    pub server_id: Option<ServerId>,
    /// True iff the server is known to hold these exact field values
    pub synced: bool,
    /// Bumped on every local write; sync writes compare-and-set on it
    pub revision: i64,
    /// Set once on insert
    pub created_at: DateTime<Utc>,
    /// The domain fields
    pub data: T,
}

impl<T> Record<T> {
    pub fn is_pending(&self) -> bool {
        !self.synced
    }
}

/// A kind of domain record the engine can store and sync.
///
/// `Wire` is the JSON shape the server speaks. For kinds without an owner it
/// is usually `Self`; linked kinds carry the owner's *server* id on the wire
/// and the owner's *local* id locally, so they need their own wire type.
pub trait Entity:
    Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + Unpin + 'static
{
    const KIND: EntityKind;

    /// Partial update: every `Some` field replaces the stored value.
    type Patch: fmt::Debug + Default + Send + Sync + 'static;

    type Wire: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static;

    /// Check field-level rules before anything is written.
    fn validate(&self) -> Result<()>;

    fn apply(&mut self, patch: Self::Patch);

    /// The owner this record points at, if any.
    fn link(&self) -> Option<Link> {
        None
    }

    /// Remember the owner's server id (or forget a stale one).
    fn set_owner_server_id(&mut self, _server_id: Option<ServerId>) {}

    /// Drop an optional link after its owner was deleted.
    fn detach(&mut self) {}

    /// Calendar day indexed for filtering (and for the daily slot rule).
    fn day(&self) -> Option<NaiveDate> {
        None
    }

    /// Secondary enumerated attribute indexed for filtering.
    fn category(&self) -> Option<String> {
        None
    }

    /// Server form of this record. `owner` is the owner's current server id.
    ///
    /// Returns `None` when the record links to an owner the server does not
    /// know yet; such a record is deferred until its owner is pushed.
    fn to_wire(&self, owner: Option<&ServerId>) -> Option<Self::Wire>;

    /// Owner server id named by a server record.
    fn wire_owner(_wire: &Self::Wire) -> Option<&ServerId> {
        None
    }

    /// Local form of a server record. `owner` is the resolved local owner.
    fn from_wire(wire: Self::Wire, owner: Option<Link>) -> Result<Self>;
}

/// Run a block once for the concrete type of an [`EntityKind`] value.
///
/// ```ignore
/// with_entity!(kind, E => store.count_pending::<E>().await)
/// ```
#[macro_export]
macro_rules! with_entity {
    ($kind:expr, $entity:ident => $body:expr) => {
        match $kind {
            $crate::EntityKind::Animal => {
                type $entity = $crate::model::Animal;
                $body
            }
            $crate::EntityKind::Report => {
                type $entity = $crate::model::Report;
                $body
            }
            $crate::EntityKind::Crop => {
                type $entity = $crate::model::Crop;
                $body
            }
            $crate::EntityKind::Expense => {
                type $entity = $crate::model::Expense;
                $body
            }
            $crate::EntityKind::Income => {
                type $entity = $crate::model::Income;
                $body
            }
            $crate::EntityKind::LandPlot => {
                type $entity = $crate::model::LandPlot;
                $body
            }
            $crate::EntityKind::Reminder => {
                type $entity = $crate::model::Reminder;
                $body
            }
        }
    };
}

pub(crate) fn require_text(kind: EntityKind, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::invalid(kind, format!("{field} must not be blank")));
    }
    Ok(())
}

pub(crate) fn require_amount(kind: EntityKind, field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::invalid(
            kind,
            format!("{field} must be a non-negative number, got {value}"),
        ));
    }
    Ok(())
}

pub(crate) fn missing_owner(kind: EntityKind) -> Error {
    Error::invalid(kind, "server record names an owner that is not known locally")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owners_precede_dependents() {
        for (index, kind) in EntityKind::ALL.iter().enumerate() {
            if let Some(owner) = kind.owner() {
                let owner_index = EntityKind::ALL.iter().position(|k| *k == owner).unwrap();
                assert!(owner_index < index, "{owner} must come before {kind}");
            }
        }
    }

    #[test]
    fn kind_lookup_by_any_name() {
        assert_eq!("land".parse::<EntityKind>().unwrap(), EntityKind::LandPlot);
        assert_eq!("land_plots".parse::<EntityKind>().unwrap(), EntityKind::LandPlot);
        assert_eq!("report".parse::<EntityKind>().unwrap(), EntityKind::Report);
        assert!("barn".parse::<EntityKind>().is_err());
        assert_eq!(EntityKind::from_path("income"), Some(EntityKind::Income));
    }

    #[test]
    fn crop_dependents() {
        let dependents: Vec<_> = EntityKind::Crop.dependents().collect();
        assert_eq!(
            dependents,
            vec![
                EntityKind::Expense,
                EntityKind::Income,
                EntityKind::LandPlot,
                EntityKind::Reminder
            ]
        );
        assert!(EntityKind::LandPlot.owner().is_some());
        assert!(!EntityKind::LandPlot.link_required());
    }

    #[test]
    fn amount_rules() {
        assert!(require_amount(EntityKind::Report, "milk", 12.5).is_ok());
        assert!(require_amount(EntityKind::Report, "milk", -1.0).is_err());
        assert!(require_amount(EntityKind::Report, "milk", f64::NAN).is_err());
        assert!(require_text(EntityKind::Animal, "name", "  ").is_err());
    }
}
