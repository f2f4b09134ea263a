//! TNT entities and their JSON decoding.
//!
//! Every entity is decoded through a typed function that names the entity
//! and, when serde reports it, the missing or invalid field. A response that
//! lacks a required field is rejected rather than half-filled.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::PrimitiveDateTime;

use crate::config::ProjectConfig;
use crate::section::MARKER;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A TNT response that does not match the expected schema.
#[derive(Debug, Error)]
#[error("failed to decode {entity}{}: {source}", field_suffix(.field))]
pub struct DecodeError {
    pub entity: &'static str,
    /// The field serde complained about, when it named one.
    pub field: Option<String>,
    #[source]
    pub source: serde_json::Error,
}

fn field_suffix(field: &Option<String>) -> String {
    match field {
        Some(field) => format!(" (field `{field}`)"),
        None => String::new(),
    }
}

impl DecodeError {
    pub(crate) fn new(entity: &'static str, source: serde_json::Error) -> Self {
        Self {
            entity,
            field: offending_field(&source.to_string()),
            source,
        }
    }
}

/// Pull the field name out of serde's "missing field `x`" /
/// "unknown field `x`" / "duplicate field `x`" messages.
fn offending_field(message: &str) -> Option<String> {
    let (_, rest) = message.split_once(" field `")?;
    let (field, _) = rest.split_once('`')?;
    Some(field.to_string())
}

fn decode<T: DeserializeOwned>(entity: &'static str, body: &str) -> Result<T, DecodeError> {
    serde_json::from_str(body).map_err(|e| DecodeError::new(entity, e))
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
}

impl Organization {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub open: bool,
    #[serde(default)]
    pub billable: bool,
}

impl Project {
    pub fn new(id: i64, name: impl Into<String>, open: bool, billable: bool) -> Self {
        Self {
            id,
            name: name.into(),
            open,
            billable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub name: String,
}

impl Role {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// An imputed activity as returned by `GET activities`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: i64,
    pub start_date: String,
    /// Minutes.
    pub duration: i64,
    pub description: String,
    pub billable: bool,
    pub organization: Organization,
    pub project: Project,
    pub project_role: Role,
}

impl Activity {
    /// Whether this activity carries automatically created evidence.
    pub fn is_automatic(&self) -> bool {
        self.description.contains(MARKER)
    }
}

/// Activities of one day.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActivitiesResponse {
    pub date: String,
    pub activities: Vec<Activity>,
}

time::serde::format_description!(
    naive_date_time,
    PrimitiveDateTime,
    "[year]-[month]-[day]T[hour]:[minute]:[second]"
);

/// Body of `POST activities`: creates the activity, or updates it when `id`
/// is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveActivityRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(with = "naive_date_time")]
    pub start_date: PrimitiveDateTime,
    pub duration: i64,
    pub description: String,
    pub billable: bool,
    pub project_role_id: i64,
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

pub fn decode_organizations(body: &str) -> Result<Vec<Organization>, DecodeError> {
    decode("organization", body)
}

pub fn decode_projects(body: &str) -> Result<Vec<Project>, DecodeError> {
    decode("project", body)
}

pub fn decode_roles(body: &str) -> Result<Vec<Role>, DecodeError> {
    decode("role", body)
}

/// Decode a per-day activities response and flatten it, keeping day order.
pub fn decode_activities(body: &str) -> Result<Vec<Activity>, DecodeError> {
    let days: Vec<ActivitiesResponse> = decode("activity", body)?;
    Ok(days.into_iter().flat_map(|day| day.activities).collect())
}

/// First automatic activity imputed to the configured organization, project
/// and role.
pub fn find_automatic_evidence<'a>(
    config: &ProjectConfig,
    activities: &'a [Activity],
) -> Option<&'a Activity> {
    activities.iter().find(|activity| {
        activity.is_automatic()
            && activity.organization.name == config.organization
            && activity.project.name == config.project
            && activity.project_role.name == config.role
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
