//! Land plots. A plot may be growing a crop; when the crop goes away the
//! plot stays and simply loses the link.

use super::{require_amount, require_text, wire, Entity, EntityKind, Link, LocalId, ServerId};
use crate::error::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandPlot {
    pub plot_name: String,
    #[serde(default)]
    pub plot_area_acres: f64,
    #[serde(default)]
    pub soil_type: String,
    #[serde(default)]
    pub current_crop_id: Option<LocalId>,
    #[serde(default)]
    pub current_crop_server_id: Option<ServerId>,
    #[serde(default)]
    pub notes: String,
}

impl LandPlot {
    pub fn new(plot_name: impl Into<String>, plot_area_acres: f64) -> Self {
        Self {
            plot_name: plot_name.into(),
            plot_area_acres,
            soil_type: String::new(),
            current_crop_id: None,
            current_crop_server_id: None,
            notes: String::new(),
        }
    }

    #[must_use]
    pub fn with_soil(mut self, soil_type: impl Into<String>) -> Self {
        self.soil_type = soil_type.into();
        self
    }

    #[must_use]
    pub fn growing(mut self, crop: LocalId) -> Self {
        self.current_crop_id = Some(crop);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct LandPlotPatch {
    pub plot_name: Option<String>,
    pub plot_area_acres: Option<f64>,
    pub soil_type: Option<String>,
    /// `Some(None)` clears the current crop
    pub current_crop_id: Option<Option<LocalId>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandPlotWire {
    pub plot_name: String,
    #[serde(default)]
    pub plot_area_acres: f64,
    #[serde(default)]
    pub soil_type: String,
    #[serde(default, deserialize_with = "wire::optional_owner")]
    pub current_crop_id: Option<ServerId>,
    #[serde(default)]
    pub notes: String,
}

impl Entity for LandPlot {
    const KIND: EntityKind = EntityKind::LandPlot;
    type Patch = LandPlotPatch;
    type Wire = LandPlotWire;

    fn validate(&self) -> Result<()> {
        require_text(Self::KIND, "plot_name", &self.plot_name)?;
        require_amount(Self::KIND, "plot_area_acres", self.plot_area_acres)
    }

    fn apply(&mut self, patch: LandPlotPatch) {
        if let Some(name) = patch.plot_name {
            self.plot_name = name;
        }
        if let Some(area) = patch.plot_area_acres {
            self.plot_area_acres = area;
        }
        if let Some(soil) = patch.soil_type {
            self.soil_type = soil;
        }
        if let Some(crop) = patch.current_crop_id {
            if crop != self.current_crop_id {
                self.current_crop_server_id = None;
            }
            self.current_crop_id = crop;
        }
        if let Some(notes) = patch.notes {
            self.notes = notes;
        }
    }

    fn link(&self) -> Option<Link> {
        self.current_crop_id
            .map(|crop| Link::new(crop, self.current_crop_server_id.clone()))
    }

    fn set_owner_server_id(&mut self, server_id: Option<ServerId>) {
        if self.current_crop_id.is_some() {
            self.current_crop_server_id = server_id;
        }
    }

    fn detach(&mut self) {
        self.current_crop_id = None;
        self.current_crop_server_id = None;
    }

    fn category(&self) -> Option<String> {
        let soil = self.soil_type.trim();
        (!soil.is_empty()).then(|| soil.to_lowercase())
    }

    fn to_wire(&self, owner: Option<&ServerId>) -> Option<LandPlotWire> {
        let current_crop_id = match self.current_crop_id {
            Some(_) => Some(owner?.clone()),
            None => None,
        };
        Some(LandPlotWire {
            plot_name: self.plot_name.clone(),
            plot_area_acres: self.plot_area_acres,
            soil_type: self.soil_type.clone(),
            current_crop_id,
            notes: self.notes.clone(),
        })
    }

    fn wire_owner(wire: &LandPlotWire) -> Option<&ServerId> {
        wire.current_crop_id.as_ref()
    }

    /// A plot pointing at a crop this device does not know is kept, unlinked.
    fn from_wire(wire: LandPlotWire, owner: Option<Link>) -> Result<Self> {
        let (current_crop_id, current_crop_server_id) = match owner {
            Some(link) => (Some(link.owner), wire.current_crop_id),
            None => (None, None),
        };
        Ok(Self {
            plot_name: wire.plot_name,
            plot_area_acres: wire.plot_area_acres,
            soil_type: wire.soil_type,
            current_crop_id,
            current_crop_server_id,
            notes: wire.notes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unlinked_plot_is_never_deferred() {
        let plot = LandPlot::new("North field", 2.5).with_soil("Loam");
        let wire = plot.to_wire(None).unwrap();
        assert_eq!(wire.current_crop_id, None);
        assert_eq!(plot.category().as_deref(), Some("loam"));
    }

    #[test]
    fn linked_plot_waits_for_its_crop() {
        let plot = LandPlot::new("North field", 2.5).growing(LocalId::new(3));
        assert!(plot.to_wire(None).is_none());
        let wire = plot.to_wire(Some(&ServerId::from("c1"))).unwrap();
        assert_eq!(wire.current_crop_id, Some(ServerId::from("c1")));
    }

    #[test]
    fn detach_and_relink() {
        let mut plot = LandPlot::new("North field", 2.5).growing(LocalId::new(3));
        plot.set_owner_server_id(Some(ServerId::from("c1")));
        plot.apply(LandPlotPatch {
            current_crop_id: Some(Some(LocalId::new(4))),
            ..Default::default()
        });
        assert_eq!(plot.current_crop_server_id, None);

        plot.detach();
        assert!(plot.link().is_none());
        plot.set_owner_server_id(Some(ServerId::from("c2")));
        assert_eq!(plot.current_crop_server_id, None);
    }

    #[test]
    fn server_plot_with_unknown_crop_is_unlinked() {
        let wire: LandPlotWire = serde_json::from_value(json!({
            "plot_name": "South",
            "plot_area_acres": 1.0,
            "current_crop_id": {"_id": "c7", "crop_name": "Rice"},
        }))
        .unwrap();
        assert_eq!(LandPlot::wire_owner(&wire), Some(&ServerId::from("c7")));
        let plot = LandPlot::from_wire(wire, None).unwrap();
        assert_eq!(plot.current_crop_id, None);
        assert_eq!(plot.current_crop_server_id, None);
    }
}
