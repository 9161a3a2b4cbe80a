//! Wire types for the Homely SDK REST endpoints.
//!
//! Field names follow the server's camelCase via
//! `#[serde(rename_all = "camelCase")]`, with explicit renames for the
//! handful of keys the server sends in all-lowercase (`gatewayserial`).
//! Feature/state subtrees are kept loosely typed -- `homely-core` owns the
//! mapping onto its closed state model.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Authentication ───────────────────────────────────────────────────

/// Token grant — from `POST /homely/oauth/token` and
/// `POST /homely/oauth/refresh-token`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    /// Refresh token lifetime in seconds.
    pub refresh_expires_in: u64,
}

// ── Locations ────────────────────────────────────────────────────────

/// Location overview — one entry of `GET /homely/locations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationEntry {
    pub name: String,
    /// The caller's role at this location (e.g. `"OWNER"`).
    pub role: String,
    pub user_id: String,
    pub location_id: String,
    #[serde(rename = "gatewayserial")]
    pub gateway_serial: String,
}

/// Full site payload — from `GET /homely/home/{locationId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeResponse {
    pub location_id: String,
    #[serde(rename = "gatewayserial")]
    pub gateway_serial: String,
    pub name: String,
    /// Site alarm state as the server spells it (e.g. `"DISARMED"`).
    pub alarm_state: String,
    /// Not sent by all server revisions; absent until the first
    /// alarm-state-changed stream event when missing.
    #[serde(default)]
    pub alarm_state_last_updated: Option<String>,
    pub user_role_at_location: String,
    pub devices: Vec<RawDevice>,
}

// ── Devices ──────────────────────────────────────────────────────────

/// One device entry of a home payload. The identity fields are typed;
/// the feature subtrees stay schemaless until `homely-core` builds its
/// state model from them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDevice {
    pub id: String,
    pub name: String,
    pub serial_number: String,
    /// Parent location name within the site (e.g. `"Floor 0 - Entrance"`).
    pub location: String,
    pub online: bool,
    pub model_id: String,
    /// Vendor model name — the dispatch key for the device catalog.
    pub model_name: String,
    #[serde(default)]
    pub features: FeatureMap,
}

/// Feature name (`"battery"`, `"temperature"`, …) to feature block.
pub type FeatureMap = HashMap<String, FeatureBlock>;

/// A named capability block holding one or more state fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureBlock {
    #[serde(default)]
    pub states: HashMap<String, StatePoint>,
}

/// A single `{value, lastUpdated}` pair as the server sends it.
///
/// `value` stays a raw JSON value -- booleans, numbers, strings, and
/// nulls all occur, and the typed interpretation belongs to the state
/// model. `lastUpdated` is ISO-8601 text or null.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePoint {
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub last_updated: Option<String>,
}
