// ── Location aggregate ──
//
// One physical site: its device inventory plus the site alarm state.
// The aggregate exclusively owns its devices; device lifetime equals
// aggregate lifetime, and a fresh REST fetch replaces the whole set.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use homely_api::types::{HomeResponse, LocationEntry};
use homely_api::HomelyClient;

use crate::error::CoreError;
use crate::model::alarm::AlarmState;
use crate::model::device::Device;

/// Location overview from the locations listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationSummary {
    pub name: String,
    /// The caller's role at this location (e.g. `"OWNER"`).
    pub role: String,
    pub user_id: String,
    pub location_id: String,
    pub gateway_serial: String,
}

impl From<LocationEntry> for LocationSummary {
    fn from(entry: LocationEntry) -> Self {
        Self {
            name: entry.name,
            role: entry.role,
            user_id: entry.user_id,
            location_id: entry.location_id,
            gateway_serial: entry.gateway_serial,
        }
    }
}

impl LocationSummary {
    /// List the locations the authenticated account can access.
    pub async fn fetch(client: &HomelyClient) -> Result<Vec<Self>, CoreError> {
        let entries = client.get_locations().await?;
        Ok(entries.into_iter().map(Self::from).collect())
    }
}

impl std::fmt::Display for LocationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Full state of one site: alarm state plus the owned device collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SingleLocation {
    pub location_id: String,
    pub gateway_serial: String,
    pub name: String,
    pub alarm_state: AlarmState,
    pub alarm_state_last_updated: Option<DateTime<Utc>>,
    pub user_role_at_location: String,
    /// Owned devices, in server order. Ids are unique within a snapshot.
    pub devices: Vec<Device>,
    /// Model names the registry did not recognize in the last build.
    /// Those entries were skipped, not fatal.
    pub unknown_models: Vec<String>,
}

impl SingleLocation {
    /// Build the aggregate from a home payload.
    ///
    /// Unrecognized device models are logged, recorded in
    /// `unknown_models`, and skipped -- the rest of the inventory still
    /// builds. A *recognized* model with a malformed feature payload is
    /// a hard error: that means a schema assumption broke for a device
    /// this client claims to understand.
    pub fn from_response(response: HomeResponse) -> Result<Self, CoreError> {
        let alarm_state = AlarmState::from_wire(&response.alarm_state);
        if !alarm_state.is_known() {
            warn!(state = %alarm_state, "unrecognized alarm state from server, mirroring as-is");
        }

        let alarm_state_last_updated = response
            .alarm_state_last_updated
            .as_deref()
            .and_then(|raw| match DateTime::parse_from_rfc3339(raw) {
                Ok(dt) => Some(dt.with_timezone(&Utc)),
                Err(e) => {
                    warn!(raw, error = %e, "ignoring unparseable alarm-state timestamp");
                    None
                }
            });

        let mut devices = Vec::with_capacity(response.devices.len());
        let mut unknown_models = Vec::new();
        for raw in &response.devices {
            match Device::from_rest(raw) {
                Ok(device) => devices.push(device),
                Err(CoreError::UnknownDevice { model_name }) => {
                    warn!(
                        device_id = %raw.id,
                        model_name = %model_name,
                        "skipping unknown device model"
                    );
                    unknown_models.push(model_name);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Self {
            location_id: response.location_id,
            gateway_serial: response.gateway_serial,
            name: response.name,
            alarm_state,
            alarm_state_last_updated,
            user_role_at_location: response.user_role_at_location,
            devices,
            unknown_models,
        })
    }

    /// Look up a device by identifier. Nothing-found is a valid,
    /// non-error outcome.
    pub fn find_device(&self, device_id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == device_id)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}

impl std::fmt::Display for SingleLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} with {} devices", self.name, self.devices.len())
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn home_payload(devices: serde_json::Value) -> HomeResponse {
        serde_json::from_value(json!({
            "locationId": "48617520-863c-4e27-9a05-4ce3cce50f8e",
            "gatewayserial": "0201000128",
            "name": "Home",
            "alarmState": "DISARMED",
            "userRoleAtLocation": "OWNER",
            "devices": devices,
        }))
        .unwrap()
    }

    fn window_sensor_json(id: &str, model_name: &str) -> serde_json::Value {
        json!({
            "features": {
                "alarm": {
                    "states": {
                        "alarm": {"lastUpdated": "2022-12-31T16:34:31.189Z", "value": false},
                        "tamper": {"lastUpdated": "2022-06-10T15:43:20.402Z", "value": false},
                    }
                },
                "battery": {
                    "states": {
                        "low": {"lastUpdated": "2022-06-10T15:29:20.956Z", "value": false},
                        "voltage": {"lastUpdated": "2022-12-09T12:33:11.390Z", "value": 2.9},
                    }
                },
                "diagnostic": {
                    "states": {
                        "networklinkaddress": {"lastUpdated": "2022-11-19T22:00:31.223Z", "value": "0015BC0041001B88"},
                        "networklinkstrength": {"lastUpdated": "2022-12-31T16:07:13.769Z", "value": 92},
                    }
                },
                "temperature": {"states": {"temperature": {"lastUpdated": "2022-12-31T16:26:12.692Z", "value": 16}}},
            },
            "id": id,
            "location": "Floor 0 - Entrance",
            "modelId": "87fa1ae0-824f-4d42-be7a-cc5b6c7b1e35",
            "modelName": model_name,
            "name": "Window Sensor",
            "online": true,
            "serialNumber": "0015BC001E014469",
        })
    }

    #[test]
    fn builds_devices_and_base_fields() {
        let home = home_payload(json!([
            window_sensor_json("device-1", "Window Sensor"),
            window_sensor_json("device-2", "Window Alarm Sensor"),
        ]));

        let location = SingleLocation::from_response(home).unwrap();

        assert_eq!(location.name, "Home");
        assert_eq!(location.gateway_serial, "0201000128");
        assert_eq!(location.alarm_state, AlarmState::Disarmed);
        assert_eq!(location.alarm_state_last_updated, None);
        assert_eq!(location.device_count(), 2);
        assert!(location.unknown_models.is_empty());
    }

    #[test]
    fn unknown_models_are_skipped_and_recorded() {
        let home = home_payload(json!([
            window_sensor_json("device-1", "Window Sensor"),
            window_sensor_json("device-2", "Bogus model"),
            window_sensor_json("device-3", "Window Sensor"),
        ]));

        let location = SingleLocation::from_response(home).unwrap();

        assert_eq!(location.device_count(), 2);
        assert_eq!(location.unknown_models, vec!["Bogus model".to_owned()]);
        assert!(location.find_device("device-2").is_none());
        assert!(location.find_device("device-3").is_some());
    }

    #[test]
    fn known_model_with_broken_payload_fails_the_build() {
        let mut broken = window_sensor_json("device-1", "Window Sensor");
        broken["features"]["battery"]["states"]
            .as_object_mut()
            .unwrap()
            .remove("voltage");

        let err = SingleLocation::from_response(home_payload(json!([broken]))).unwrap_err();
        assert!(matches!(err, CoreError::State(_)));
    }

    #[test]
    fn find_device_misses_cleanly() {
        let home = home_payload(json!([window_sensor_json("device-1", "Window Sensor")]));
        let location = SingleLocation::from_response(home).unwrap();

        assert!(location.find_device("device-1").is_some());
        assert!(location.find_device("no-such-id").is_none());
    }

    #[test]
    fn unrecognized_alarm_state_is_mirrored() {
        let home: HomeResponse = serde_json::from_value(json!({
            "locationId": "48617520-863c-4e27-9a05-4ce3cce50f8e",
            "gatewayserial": "0201000128",
            "name": "Home",
            "alarmState": "ARMED_VACATION",
            "userRoleAtLocation": "OWNER",
            "devices": [],
        }))
        .unwrap();

        let location = SingleLocation::from_response(home).unwrap();
        assert_eq!(
            location.alarm_state,
            AlarmState::Unknown("ARMED_VACATION".to_owned())
        );
    }
}
