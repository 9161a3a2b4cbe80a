// ── Stream reconciliation ──
//
// Applies decoded stream events to a SingleLocation in place. The
// stream delivers deltas, not full objects: existing Device and state
// records are mutated through their stable identifiers (device id,
// feature slot), never rebuilt, so anything holding the aggregate sees
// updates without re-fetching.
//
// Nothing in here may take down the consumer loop. Every malformed or
// unroutable piece of data degrades to a logged skip at the smallest
// granularity that keeps the rest of the event applying.

use tracing::{debug, warn};

use homely_api::stream::StreamEvent;

use crate::model::alarm::AlarmState;
use crate::model::device::Device;
use crate::model::location::SingleLocation;
use crate::model::state::{parse_instant, Feature};

/// What a reconciled event touched, for per-feature callback dispatch.
#[derive(Debug, PartialEq)]
pub enum EventOutcome<'a> {
    /// The site alarm state changed; no device, no states.
    AlarmChanged { location: &'a SingleLocation },
    /// A device's states were patched. `changed` lists the distinct
    /// feature slots touched, in application order.
    DeviceChanged {
        device: &'a Device,
        changed: Vec<Feature>,
    },
}

impl SingleLocation {
    /// Apply one decoded stream event, returning what changed.
    ///
    /// `None` means the event had no effect here: an unknown event
    /// type, or a delta addressed to a device this snapshot does not
    /// contain (devices can be added server-side between fetches --
    /// dropped with a warning, the aggregate untouched).
    pub fn handle_event(&mut self, event: &StreamEvent) -> Option<EventOutcome<'_>> {
        match event {
            StreamEvent::AlarmStateChanged(data) => {
                let state = AlarmState::from_wire(&data.state);
                if !state.is_known() {
                    warn!(state = %state, "unrecognized alarm state from stream, mirroring as-is");
                }

                // The server's state machine is authoritative; both
                // fields are overwritten unconditionally.
                self.alarm_state = state;
                self.alarm_state_last_updated =
                    match parse_instant("timestamp", data.timestamp.as_deref()) {
                        Ok(ts) => ts,
                        Err(e) => {
                            warn!(error = %e, "alarm-state timestamp unparseable, clearing");
                            None
                        }
                    };

                Some(EventOutcome::AlarmChanged { location: self })
            }

            StreamEvent::DeviceStateChanged(data) => {
                let Some(index) = self.devices.iter().position(|d| d.id == data.device_id)
                else {
                    warn!(
                        device_id = %data.device_id,
                        changes = data.changes.len(),
                        "dropping state update for device not in this snapshot"
                    );
                    return None;
                };
                let device = &mut self.devices[index];

                let mut changed: Vec<Feature> = Vec::new();
                for change in &data.changes {
                    match device.states.apply_change(change) {
                        Ok(feature) => {
                            if !changed.contains(&feature) {
                                changed.push(feature);
                            }
                        }
                        // One bad change must not abort the batch.
                        Err(e) => warn!(
                            device = %device,
                            feature = %change.feature,
                            field = %change.state_name,
                            error = %e,
                            "skipping unapplicable state change"
                        ),
                    }
                }

                Some(EventOutcome::DeviceChanged {
                    device: &self.devices[index],
                    changed,
                })
            }

            StreamEvent::Unknown { event_type, .. } => {
                debug!(event_type = %event_type, "ignoring unrecognized stream event type");
                None
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use homely_api::types::HomeResponse;

    fn location_with_window_sensor() -> SingleLocation {
        let home: HomeResponse = serde_json::from_value(json!({
            "locationId": "48617520-863c-4e27-9a05-4ce3cce50f8e",
            "gatewayserial": "0201000128",
            "name": "Home",
            "alarmState": "DISARMED",
            "userRoleAtLocation": "OWNER",
            "devices": [{
                "features": {
                    "alarm": {
                        "states": {
                            "alarm": {"lastUpdated": "2022-12-31T16:34:31.189Z", "value": false},
                            "tamper": {"lastUpdated": "2022-06-10T15:43:20.402Z", "value": false},
                        }
                    },
                    "battery": {
                        "states": {
                            "defect": {"lastUpdated": null, "value": null},
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
                "id": "ad5d19b5-3988-4ad2-96c0-08f6283e073a",
                "location": "Floor 0 - Entrance",
                "modelId": "87fa1ae0-824f-4d42-be7a-cc5b6c7b1e35",
                "modelName": "Window Sensor",
                "name": "Window Sensor",
                "online": true,
                "serialNumber": "0015BC001E014469",
            }],
        }))
        .unwrap();
        SingleLocation::from_response(home).unwrap()
    }

    fn device_event(changes: serde_json::Value) -> StreamEvent {
        decode(json!({
            "type": "device-state-changed",
            "data": {
                "deviceId": "ad5d19b5-3988-4ad2-96c0-08f6283e073a",
                "gatewayId": "3b0187f4-878e-4b51-af2b-fc563b81f137",
                "locationId": "48617520-863c-4e27-9a05-4ce3cce50f8e",
                "changes": changes,
            },
        }))
    }

    fn decode(raw: serde_json::Value) -> StreamEvent {
        match raw["type"].as_str().unwrap() {
            "device-state-changed" => StreamEvent::DeviceStateChanged(
                serde_json::from_value(raw["data"].clone()).unwrap(),
            ),
            "alarm-state-changed" => StreamEvent::AlarmStateChanged(
                serde_json::from_value(raw["data"].clone()).unwrap(),
            ),
            other => StreamEvent::Unknown {
                event_type: other.to_owned(),
                data: raw["data"].clone(),
            },
        }
    }

    #[test]
    fn temperature_delta_updates_only_that_field() {
        let mut location = location_with_window_sensor();
        let event = device_event(json!([{
            "feature": "temperature",
            "stateName": "temperature",
            "value": 4.8,
            "lastUpdated": "2023-01-25T10:27:07.786Z",
        }]));

        let outcome = location.handle_event(&event).unwrap();
        let EventOutcome::DeviceChanged { device, changed } = outcome else {
            panic!("expected DeviceChanged");
        };
        assert_eq!(changed, vec![Feature::Temperature]);

        let temperature = device.states.temperature().unwrap();
        assert_eq!(temperature.temperature.value, 4.8);
        assert_eq!(
            temperature.temperature.last_updated.unwrap(),
            Utc.with_ymd_and_hms(2023, 1, 25, 10, 27, 7).unwrap()
                + chrono::Duration::milliseconds(786)
        );

        // Neighboring fields untouched.
        assert_eq!(device.states.battery().unwrap().voltage.value, 2.9);
        assert!(!device.states.basic_alarm().unwrap().alarm.value);
    }

    #[test]
    fn applying_the_same_batch_twice_is_idempotent() {
        let mut location = location_with_window_sensor();
        let event = device_event(json!([{
            "feature": "temperature",
            "stateName": "temperature",
            "value": 4.8,
            "lastUpdated": "2023-01-25T10:27:07.786Z",
        }]));

        location.handle_event(&event).unwrap();
        let first = location.clone();
        location.handle_event(&event).unwrap();

        assert_eq!(location, first);
    }

    #[test]
    fn one_bad_change_does_not_abort_the_batch() {
        let mut location = location_with_window_sensor();
        let event = device_event(json!([
            {
                "feature": "humidity",
                "stateName": "humidity",
                "value": 55,
                "lastUpdated": "2023-01-25T10:27:07.786Z",
            },
            {
                "feature": "temperature",
                "stateName": "temperature",
                "value": 4.8,
                "lastUpdated": "2023-01-25T10:27:07.786Z",
            },
            {
                "feature": "battery",
                "stateName": "low",
                "value": true,
                "lastUpdated": "2023-01-25T10:27:07.786Z",
            },
        ]));

        let outcome = location.handle_event(&event).unwrap();
        let EventOutcome::DeviceChanged { device, changed } = outcome else {
            panic!("expected DeviceChanged");
        };

        // The bad change is skipped; both good ones apply, in order.
        assert_eq!(changed, vec![Feature::Temperature, Feature::Battery]);
        assert_eq!(device.states.temperature().unwrap().temperature.value, 4.8);
        assert!(device.states.battery().unwrap().low.value);
    }

    #[test]
    fn feature_touched_twice_reports_once() {
        let mut location = location_with_window_sensor();
        let event = device_event(json!([
            {
                "feature": "alarm",
                "stateName": "alarm",
                "value": true,
                "lastUpdated": "2023-01-25T10:27:07.786Z",
            },
            {
                "feature": "battery",
                "stateName": "low",
                "value": true,
                "lastUpdated": "2023-01-25T10:27:07.786Z",
            },
            {
                "feature": "alarm",
                "stateName": "tamper",
                "value": true,
                "lastUpdated": "2023-01-25T10:27:08.000Z",
            },
        ]));

        let outcome = location.handle_event(&event).unwrap();
        let EventOutcome::DeviceChanged { device, changed } = outcome else {
            panic!("expected DeviceChanged");
        };

        assert_eq!(changed, vec![Feature::Alarm, Feature::Battery]);
        let alarm = device.states.basic_alarm().unwrap();
        assert!(alarm.alarm.value);
        assert!(alarm.tamper.value);
    }

    #[test]
    fn event_for_unknown_device_has_no_effect() {
        let mut location = location_with_window_sensor();
        let before = location.clone();

        let event = decode(json!({
            "type": "device-state-changed",
            "data": {
                "deviceId": "not-in-this-snapshot",
                "changes": [{
                    "feature": "temperature",
                    "stateName": "temperature",
                    "value": 4.8,
                    "lastUpdated": "2023-01-25T10:27:07.786Z",
                }],
            },
        }));

        assert!(location.handle_event(&event).is_none());
        assert_eq!(location, before);
    }

    #[test]
    fn alarm_event_overwrites_state_and_timestamp() {
        let mut location = location_with_window_sensor();
        let event = decode(json!({
            "type": "alarm-state-changed",
            "data": {
                "locationId": "48617520-863c-4e27-9a05-4ce3cce50f8e",
                "state": "BREACHED",
                "timestamp": "2023-01-25T10:27:07.786Z",
            },
        }));

        let outcome = location.handle_event(&event).unwrap();
        assert!(matches!(outcome, EventOutcome::AlarmChanged { .. }));

        assert_eq!(location.alarm_state, AlarmState::Breached);
        assert_eq!(
            location.alarm_state_last_updated.unwrap(),
            Utc.with_ymd_and_hms(2023, 1, 25, 10, 27, 7).unwrap()
                + chrono::Duration::milliseconds(786)
        );
    }

    #[test]
    fn startling_alarm_value_is_stored_as_is() {
        let mut location = location_with_window_sensor();
        let event = decode(json!({
            "type": "alarm-state-changed",
            "data": { "state": "LOCKDOWN" },
        }));

        location.handle_event(&event).unwrap();
        assert_eq!(
            location.alarm_state,
            AlarmState::Unknown("LOCKDOWN".to_owned())
        );
    }

    #[test]
    fn unknown_event_type_is_ignored() {
        let mut location = location_with_window_sensor();
        let before = location.clone();

        let event = decode(json!({
            "type": "gateway-rebooted",
            "data": { "gatewayId": "3b0187f4" },
        }));

        assert!(location.handle_event(&event).is_none());
        assert_eq!(location, before);
    }

    #[test]
    fn malformed_change_value_is_skipped() {
        let mut location = location_with_window_sensor();
        let event = device_event(json!([{
            "feature": "temperature",
            "stateName": "temperature",
            "value": "warm",
            "lastUpdated": "2023-01-25T10:27:07.786Z",
        }]));

        let outcome = location.handle_event(&event).unwrap();
        let EventOutcome::DeviceChanged { device, changed } = outcome else {
            panic!("expected DeviceChanged");
        };
        assert!(changed.is_empty());
        assert_eq!(device.states.temperature().unwrap().temperature.value, 16.0);
    }
}
