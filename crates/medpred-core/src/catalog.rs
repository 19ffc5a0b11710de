//! Outlet and product records exposed by the REST API.

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CoreError;

/// A pharmacy-like outlet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medpred {
    pub id: i32,
    pub medpred_name: String,
}

/// A product assigned to a medpred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedProduct {
    pub id: i32,
    pub product_name: String,
    pub product_code: Option<String>,
    pub assigned_date: Option<NaiveDateTime>,
}

/// A product search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductMatch {
    pub product_name: String,
    pub product_code: Option<String>,
}

/// Body of the assign/unassign requests.
///
/// Both fields are optional on the wire so a missing field can be reported
/// as a validation error rather than a deserialization failure. Form-backed
/// clients send `medpred_id` as a string, so numeric strings are accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    #[serde(default, deserialize_with = "lenient_id")]
    pub medpred_id: Option<i32>,
    #[serde(default)]
    pub product_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Int(i64),
    Text(String),
    Other(serde::de::IgnoredAny),
}

/// Integer id from a JSON number or numeric string; anything else is `None`.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let id = match Option::<IdRepr>::deserialize(deserializer)? {
        Some(IdRepr::Int(n)) => i32::try_from(n).ok(),
        Some(IdRepr::Text(text)) => text.trim().parse().ok(),
        Some(IdRepr::Other(_)) | None => None,
    };
    Ok(id)
}

impl Assignment {
    /// Return `(medpred_id, product_name)` or fail when either is missing or empty.
    pub fn require(&self) -> Result<(i32, &str), CoreError> {
        match (self.medpred_id, self.product_name.as_deref()) {
            (Some(id), Some(name)) if id != 0 && !name.trim().is_empty() => Ok((id, name)),
            _ => Err(CoreError::InvalidInput(
                "medpred_id and product_name are required".to_string(),
            )),
        }
    }
}
