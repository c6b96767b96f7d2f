//! Livestock.

use super::{require_amount, require_text, Entity, EntityKind, Link, ServerId};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnimalType {
    Cow,
    Buffalo,
    Goat,
    Sheep,
}

impl AnimalType {
    pub const ALL: [AnimalType; 4] = [Self::Cow, Self::Buffalo, Self::Goat, Self::Sheep];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cow => "cow",
            Self::Buffalo => "buffalo",
            Self::Goat => "goat",
            Self::Sheep => "sheep",
        }
    }
}

impl fmt::Display for AnimalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnimalType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown animal type: {s}"))
    }
}

/// Value of a user-defined attribute. Only scalars are allowed so that
/// attribute maps serialize and compare deterministically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// User-defined fields on an animal (breed, colour, vaccination flags...).
pub type Attributes = BTreeMap<String, AttributeValue>;

/// An animal in the herd.
///
/// Animals own no links, so the local shape is also the wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Animal {
    pub name: String,
    #[serde(default)]
    pub tag_number: String,
    #[serde(rename = "type")]
    pub animal_type: AnimalType,
    /// Age in years
    #[serde(default)]
    pub age: f64,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Animal {
    pub fn new(name: impl Into<String>, animal_type: AnimalType) -> Self {
        Self {
            name: name.into(),
            tag_number: String::new(),
            animal_type,
            age: 0.0,
            attributes: Attributes::new(),
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag_number: impl Into<String>) -> Self {
        self.tag_number = tag_number.into();
        self
    }

    #[must_use]
    pub fn with_age(mut self, age: f64) -> Self {
        self.age = age;
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnimalPatch {
    pub name: Option<String>,
    pub tag_number: Option<String>,
    pub animal_type: Option<AnimalType>,
    pub age: Option<f64>,
    pub attributes: Option<Attributes>,
}

impl Entity for Animal {
    const KIND: EntityKind = EntityKind::Animal;
    type Patch = AnimalPatch;
    type Wire = Animal;

    fn validate(&self) -> Result<()> {
        require_text(Self::KIND, "name", &self.name)?;
        require_amount(Self::KIND, "age", self.age)?;
        if self.attributes.keys().any(|key| key.trim().is_empty()) {
            return Err(Error::invalid(Self::KIND, "attribute keys must not be blank"));
        }
        if let Some((key, _)) = self
            .attributes
            .iter()
            .find(|(_, value)| matches!(value, AttributeValue::Number(n) if !n.is_finite()))
        {
            return Err(Error::invalid(
                Self::KIND,
                format!("attribute {key} must be a finite number"),
            ));
        }
        Ok(())
    }

    fn apply(&mut self, patch: AnimalPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(tag_number) = patch.tag_number {
            self.tag_number = tag_number;
        }
        if let Some(animal_type) = patch.animal_type {
            self.animal_type = animal_type;
        }
        if let Some(age) = patch.age {
            self.age = age;
        }
        if let Some(attributes) = patch.attributes {
            self.attributes = attributes;
        }
    }

    fn category(&self) -> Option<String> {
        Some(self.animal_type.as_str().to_string())
    }

    fn to_wire(&self, _owner: Option<&ServerId>) -> Option<Animal> {
        Some(self.clone())
    }

    fn from_wire(wire: Animal, _owner: Option<Link>) -> Result<Self> {
        Ok(wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_matches_server() {
        let animal = Animal::new("Bessie", AnimalType::Cow)
            .with_tag("T-101")
            .with_age(4.0)
            .with_attribute("breed", "Jersey")
            .with_attribute("vaccinated", true);

        let value = serde_json::to_value(animal.to_wire(None).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "Bessie",
                "tagNumber": "T-101",
                "type": "cow",
                "age": 4.0,
                "attributes": {"breed": "Jersey", "vaccinated": true},
            })
        );
    }

    #[test]
    fn server_defaults_are_tolerated() {
        let animal: Animal = serde_json::from_value(json!({
            "name": "Dolly",
            "type": "sheep",
        }))
        .unwrap();
        assert_eq!(animal.tag_number, "");
        assert_eq!(animal.age, 0.0);
        assert!(animal.attributes.is_empty());
    }

    #[test]
    fn attributes_must_be_scalar() {
        let result: std::result::Result<Animal, _> = serde_json::from_value(json!({
            "name": "Dolly",
            "type": "sheep",
            "attributes": {"pens": [1, 2]},
        }));
        assert!(result.is_err());
    }

    #[test]
    fn validation() {
        assert!(Animal::new("Bessie", AnimalType::Cow).validate().is_ok());
        assert!(Animal::new(" ", AnimalType::Cow).validate().is_err());
        assert!(Animal::new("Bessie", AnimalType::Cow)
            .with_age(-2.0)
            .validate()
            .is_err());
        assert!(Animal::new("Bessie", AnimalType::Cow)
            .with_attribute("", "x")
            .validate()
            .is_err());
    }

    #[test]
    fn patch_replaces_only_given_fields() {
        let mut animal = Animal::new("Bessie", AnimalType::Cow).with_tag("T-1");
        animal.apply(AnimalPatch {
            age: Some(5.0),
            ..Default::default()
        });
        assert_eq!(animal.name, "Bessie");
        assert_eq!(animal.tag_number, "T-1");
        assert_eq!(animal.age, 5.0);
        assert_eq!(animal.category().as_deref(), Some("cow"));
    }

    #[test]
    fn animal_type_parsing() {
        assert_eq!("Buffalo".parse::<AnimalType>().unwrap(), AnimalType::Buffalo);
        assert!("llama".parse::<AnimalType>().is_err());
    }
}
