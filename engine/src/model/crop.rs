//! Crops and the money that flows through them.

use super::{
    missing_owner, require_amount, require_text, wire, Entity, EntityKind, Link, LocalId,
    ServerId,
};
use crate::error::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CropStatus {
    #[default]
    Planned,
    Sown,
    Growing,
    Harvested,
}

impl CropStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Sown => "sown",
            Self::Growing => "growing",
            Self::Harvested => "harvested",
        }
    }
}

impl fmt::Display for CropStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A crop planted (or planned) on the farm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crop {
    pub crop_name: String,
    #[serde(default)]
    pub crop_type: String,
    #[serde(default, deserialize_with = "wire::optional_day")]
    pub sowing_date: Option<NaiveDate>,
    #[serde(default)]
    pub land_size_acres: f64,
    #[serde(default)]
    pub expected_production: f64,
    #[serde(default)]
    pub production_unit: String,
    #[serde(default)]
    pub crop_status: CropStatus,
    #[serde(default)]
    pub notes: String,
}

impl Crop {
    pub fn new(crop_name: impl Into<String>) -> Self {
        Self {
            crop_name: crop_name.into(),
            crop_type: String::new(),
            sowing_date: None,
            land_size_acres: 0.0,
            expected_production: 0.0,
            production_unit: String::new(),
            crop_status: CropStatus::Planned,
            notes: String::new(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: CropStatus) -> Self {
        self.crop_status = status;
        self
    }

    #[must_use]
    pub fn sown_on(mut self, day: NaiveDate, acres: f64) -> Self {
        self.sowing_date = Some(day);
        self.land_size_acres = acres;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CropPatch {
    pub crop_name: Option<String>,
    pub crop_type: Option<String>,
    pub sowing_date: Option<Option<NaiveDate>>,
    pub land_size_acres: Option<f64>,
    pub expected_production: Option<f64>,
    pub production_unit: Option<String>,
    pub crop_status: Option<CropStatus>,
    pub notes: Option<String>,
}

impl Entity for Crop {
    const KIND: EntityKind = EntityKind::Crop;
    type Patch = CropPatch;
    type Wire = Crop;

    fn validate(&self) -> Result<()> {
        require_text(Self::KIND, "crop_name", &self.crop_name)?;
        require_amount(Self::KIND, "land_size_acres", self.land_size_acres)?;
        require_amount(Self::KIND, "expected_production", self.expected_production)
    }

    fn apply(&mut self, patch: CropPatch) {
        if let Some(crop_name) = patch.crop_name {
            self.crop_name = crop_name;
        }
        if let Some(crop_type) = patch.crop_type {
            self.crop_type = crop_type;
        }
        if let Some(sowing_date) = patch.sowing_date {
            self.sowing_date = sowing_date;
        }
        if let Some(acres) = patch.land_size_acres {
            self.land_size_acres = acres;
        }
        if let Some(expected) = patch.expected_production {
            self.expected_production = expected;
        }
        if let Some(unit) = patch.production_unit {
            self.production_unit = unit;
        }
        if let Some(status) = patch.crop_status {
            self.crop_status = status;
        }
        if let Some(notes) = patch.notes {
            self.notes = notes;
        }
    }

    fn day(&self) -> Option<NaiveDate> {
        self.sowing_date
    }

    fn category(&self) -> Option<String> {
        Some(self.crop_status.as_str().to_string())
    }

    fn to_wire(&self, _owner: Option<&ServerId>) -> Option<Crop> {
        Some(self.clone())
    }

    fn from_wire(wire: Crop, _owner: Option<Link>) -> Result<Self> {
        Ok(wire)
    }
}

/// Cost columns of an expense entry, all in the farm's currency.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExpenseCosts {
    #[serde(default)]
    pub seed_cost: f64,
    #[serde(default)]
    pub fertilizer_cost: f64,
    #[serde(default)]
    pub spray_cost: f64,
    #[serde(default)]
    pub water_irrigation_cost: f64,
    #[serde(default)]
    pub labor_cost: f64,
    #[serde(default)]
    pub diesel_machinery_cost: f64,
    #[serde(default)]
    pub other_cost: f64,
}

impl ExpenseCosts {
    fn columns(&self) -> [(&'static str, f64); 7] {
        [
            ("seed_cost", self.seed_cost),
            ("fertilizer_cost", self.fertilizer_cost),
            ("spray_cost", self.spray_cost),
            ("water_irrigation_cost", self.water_irrigation_cost),
            ("labor_cost", self.labor_cost),
            ("diesel_machinery_cost", self.diesel_machinery_cost),
            ("other_cost", self.other_cost),
        ]
    }

    pub fn total(&self) -> f64 {
        self.columns().iter().map(|(_, cost)| cost).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub crop_id: LocalId,
    #[serde(default)]
    pub crop_server_id: Option<ServerId>,
    pub expense_date: NaiveDate,
    #[serde(flatten)]
    pub costs: ExpenseCosts,
    #[serde(default)]
    pub remarks: String,
}

impl Expense {
    pub fn new(crop_id: LocalId, expense_date: NaiveDate, costs: ExpenseCosts) -> Self {
        Self {
            crop_id,
            crop_server_id: None,
            expense_date,
            costs,
            remarks: String::new(),
        }
    }

    pub fn total(&self) -> f64 {
        self.costs.total()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExpensePatch {
    pub expense_date: Option<NaiveDate>,
    pub costs: Option<ExpenseCosts>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseWire {
    #[serde(deserialize_with = "wire::owner")]
    pub crop_id: ServerId,
    #[serde(deserialize_with = "wire::day")]
    pub expense_date: NaiveDate,
    #[serde(flatten)]
    pub costs: ExpenseCosts,
    #[serde(default)]
    pub remarks: String,
}

impl Entity for Expense {
    const KIND: EntityKind = EntityKind::Expense;
    type Patch = ExpensePatch;
    type Wire = ExpenseWire;

    fn validate(&self) -> Result<()> {
        for (field, cost) in self.costs.columns() {
            require_amount(Self::KIND, field, cost)?;
        }
        Ok(())
    }

    fn apply(&mut self, patch: ExpensePatch) {
        if let Some(day) = patch.expense_date {
            self.expense_date = day;
        }
        if let Some(costs) = patch.costs {
            self.costs = costs;
        }
        if let Some(remarks) = patch.remarks {
            self.remarks = remarks;
        }
    }

    fn link(&self) -> Option<Link> {
        Some(Link::new(self.crop_id, self.crop_server_id.clone()))
    }

    fn set_owner_server_id(&mut self, server_id: Option<ServerId>) {
        self.crop_server_id = server_id;
    }

    fn day(&self) -> Option<NaiveDate> {
        Some(self.expense_date)
    }

    fn to_wire(&self, owner: Option<&ServerId>) -> Option<ExpenseWire> {
        Some(ExpenseWire {
            crop_id: owner?.clone(),
            expense_date: self.expense_date,
            costs: self.costs,
            remarks: self.remarks.clone(),
        })
    }

    fn wire_owner(wire: &ExpenseWire) -> Option<&ServerId> {
        Some(&wire.crop_id)
    }

    fn from_wire(wire: ExpenseWire, owner: Option<Link>) -> Result<Self> {
        let owner = owner.ok_or_else(|| missing_owner(Self::KIND))?;
        Ok(Self {
            crop_id: owner.owner,
            crop_server_id: Some(wire.crop_id),
            expense_date: wire.expense_date,
            costs: wire.costs,
            remarks: wire.remarks,
        })
    }
}

/// Harvest income for a crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Income {
    pub crop_id: LocalId,
    #[serde(default)]
    pub crop_server_id: Option<ServerId>,
    pub harvest_date: NaiveDate,
    #[serde(default)]
    pub total_production: f64,
    #[serde(default)]
    pub production_unit: String,
    #[serde(default)]
    pub rate_per_unit: f64,
    #[serde(default)]
    pub notes: String,
}

impl Income {
    pub fn new(crop_id: LocalId, harvest_date: NaiveDate, total_production: f64, rate_per_unit: f64) -> Self {
        Self {
            crop_id,
            crop_server_id: None,
            harvest_date,
            total_production,
            production_unit: String::new(),
            rate_per_unit,
            notes: String::new(),
        }
    }

    pub fn total(&self) -> f64 {
        self.total_production * self.rate_per_unit
    }
}

#[derive(Debug, Clone, Default)]
pub struct IncomePatch {
    pub harvest_date: Option<NaiveDate>,
    pub total_production: Option<f64>,
    pub production_unit: Option<String>,
    pub rate_per_unit: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomeWire {
    #[serde(deserialize_with = "wire::owner")]
    pub crop_id: ServerId,
    #[serde(deserialize_with = "wire::day")]
    pub harvest_date: NaiveDate,
    #[serde(default)]
    pub total_production: f64,
    #[serde(default)]
    pub production_unit: String,
    #[serde(default)]
    pub rate_per_unit: f64,
    #[serde(default)]
    pub notes: String,
}

impl Entity for Income {
    const KIND: EntityKind = EntityKind::Income;
    type Patch = IncomePatch;
    type Wire = IncomeWire;

    fn validate(&self) -> Result<()> {
        require_amount(Self::KIND, "total_production", self.total_production)?;
        require_amount(Self::KIND, "rate_per_unit", self.rate_per_unit)
    }

    fn apply(&mut self, patch: IncomePatch) {
        if let Some(day) = patch.harvest_date {
            self.harvest_date = day;
        }
        if let Some(production) = patch.total_production {
            self.total_production = production;
        }
        if let Some(unit) = patch.production_unit {
            self.production_unit = unit;
        }
        if let Some(rate) = patch.rate_per_unit {
            self.rate_per_unit = rate;
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
        Some(self.harvest_date)
    }

    fn to_wire(&self, owner: Option<&ServerId>) -> Option<IncomeWire> {
        Some(IncomeWire {
            crop_id: owner?.clone(),
            harvest_date: self.harvest_date,
            total_production: self.total_production,
            production_unit: self.production_unit.clone(),
            rate_per_unit: self.rate_per_unit,
            notes: self.notes.clone(),
        })
    }

    fn wire_owner(wire: &IncomeWire) -> Option<&ServerId> {
        Some(&wire.crop_id)
    }

    fn from_wire(wire: IncomeWire, owner: Option<Link>) -> Result<Self> {
        let owner = owner.ok_or_else(|| missing_owner(Self::KIND))?;
        Ok(Self {
            crop_id: owner.owner,
            crop_server_id: Some(wire.crop_id),
            harvest_date: wire.harvest_date,
            total_production: wire.total_production,
            production_unit: wire.production_unit,
            rate_per_unit: wire.rate_per_unit,
            notes: wire.notes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn crop_accepts_timestamp_sowing_date() {
        let crop: Crop = serde_json::from_value(json!({
            "crop_name": "Wheat",
            "sowing_date": "2024-03-15T00:00:00.000Z",
            "crop_status": "sown",
        }))
        .unwrap();
        assert_eq!(crop.sowing_date, Some(day(15)));
        assert_eq!(crop.crop_status, CropStatus::Sown);
        assert_eq!(crop.category().as_deref(), Some("sown"));
    }

    #[test]
    fn expense_costs_flatten_on_the_wire() {
        let costs = ExpenseCosts {
            seed_cost: 1200.0,
            labor_cost: 800.0,
            ..Default::default()
        };
        let expense = Expense::new(LocalId::new(2), day(20), costs);
        assert_eq!(expense.total(), 2000.0);
        assert!(expense.to_wire(None).is_none());

        let wire = expense.to_wire(Some(&ServerId::from("c9"))).unwrap();
        let value = serde_json::to_value(&wire).unwrap();
        assert_eq!(value["crop_id"], "c9");
        assert_eq!(value["seed_cost"], 1200.0);
        assert_eq!(value["spray_cost"], 0.0);
        assert!(value.get("costs").is_none());
    }

    #[test]
    fn partial_server_expense_defaults_missing_costs() {
        let wire: ExpenseWire = serde_json::from_value(json!({
            "crop_id": {"_id": "c9", "crop_name": "Wheat"},
            "expense_date": "2024-03-20",
            "diesel_machinery_cost": 350.5,
        }))
        .unwrap();
        let expense = Expense::from_wire(wire, Some(Link::new(LocalId::new(2), None))).unwrap();
        assert_eq!(expense.crop_id, LocalId::new(2));
        assert_eq!(expense.crop_server_id, Some(ServerId::from("c9")));
        assert_eq!(expense.total(), 350.5);
    }

    #[test]
    fn negative_cost_is_invalid() {
        let costs = ExpenseCosts {
            spray_cost: -1.0,
            ..Default::default()
        };
        let err = Expense::new(LocalId::new(1), day(1), costs)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("spray_cost"));
    }

    #[test]
    fn income_total_is_production_times_rate() {
        let income = Income::new(LocalId::new(1), day(30), 40.0, 2150.0);
        assert_eq!(income.total(), 86_000.0);
        assert!(income.validate().is_ok());
    }
}
