//! Lenient deserializers for what servers actually send.
//!
//! Calendar days arrive either as `YYYY-MM-DD` or as a full timestamp
//! (`2024-06-01T00:00:00.000Z`); owner references arrive either as a bare id
//! or as a populated object carrying `_id`.

use crate::ServerId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{de::Error as _, Deserialize, Deserializer};

pub(crate) fn parse_day(raw: &str) -> Result<NaiveDate, String> {
    let raw = raw.trim();
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(day);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc).date_naive())
        .map_err(|_| format!("not a calendar day: {raw:?}"))
}

pub(crate) fn day<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_day(&raw).map_err(D::Error::custom)
}

pub(crate) fn optional_day<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) if !raw.trim().is_empty() => parse_day(&raw).map(Some).map_err(D::Error::custom),
        _ => Ok(None),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OwnerRef {
    Id(String),
    Populated {
        #[serde(rename = "_id")]
        id: String,
    },
}

impl OwnerRef {
    fn into_id(self) -> String {
        match self {
            Self::Id(id) | Self::Populated { id } => id,
        }
    }
}

pub(crate) fn owner<'de, D>(deserializer: D) -> Result<ServerId, D::Error>
where
    D: Deserializer<'de>,
{
    let id = OwnerRef::deserialize(deserializer)?.into_id();
    if id.trim().is_empty() {
        return Err(D::Error::custom("owner reference must not be empty"));
    }
    Ok(ServerId::new(id))
}

pub(crate) fn optional_owner<'de, D>(deserializer: D) -> Result<Option<ServerId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<OwnerRef>::deserialize(deserializer)?
        .map(OwnerRef::into_id)
        .filter(|id| !id.trim().is_empty())
        .map(ServerId::new))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Probe {
        #[serde(deserialize_with = "day")]
        date: NaiveDate,
        #[serde(default, deserialize_with = "optional_day")]
        sown: Option<NaiveDate>,
        #[serde(deserialize_with = "owner")]
        animal: ServerId,
        #[serde(default, deserialize_with = "optional_owner")]
        crop: Option<ServerId>,
    }

    #[test]
    fn accepts_plain_and_timestamp_days() {
        let probe: Probe = serde_json::from_value(json!({
            "date": "2024-06-01T00:00:00.000Z",
            "sown": "2024-03-15",
            "animal": "a1",
        }))
        .unwrap();
        assert_eq!(probe.date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(probe.sown, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(probe.crop, None);
    }

    #[test]
    fn accepts_populated_owner() {
        let probe: Probe = serde_json::from_value(json!({
            "date": "2024-06-01",
            "sown": "",
            "animal": {"_id": "a1", "name": "Bessie"},
            "crop": null,
        }))
        .unwrap();
        assert_eq!(probe.animal, ServerId::from("a1"));
        assert_eq!(probe.sown, None);
        assert_eq!(probe.crop, None);
    }

    #[test]
    fn rejects_garbage_day() {
        let result: Result<Probe, _> = serde_json::from_value(json!({
            "date": "yesterday",
            "animal": "a1",
        }));
        assert!(result.is_err());
        assert!(parse_day("2024-13-01").is_err());
    }
}
