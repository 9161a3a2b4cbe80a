//! State records: the typed internal form of one feature's fields.
//!
//! Every sensor reading is a [`Datum`] -- a value paired with the
//! instant the gateway last updated it, the pair always written
//! together. Construction consumes the loosely-typed feature subtrees
//! from `homely-api`; field-level patching goes through each record's
//! `apply` dispatch table, where an unknown field name is a table miss,
//! not a panic.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use strum::{AsRefStr, Display, EnumString};

use homely_api::types::{FeatureMap, StatePoint};

use crate::error::StateError;

// ── Feature slots ────────────────────────────────────────────────────

/// The closed set of feature block names a device variant can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Alarm,
    Battery,
    Diagnostic,
    Temperature,
    Metering,
}

// ── Value coercion ───────────────────────────────────────────────────

/// Conversion from a raw JSON value into a typed field slot.
///
/// `None` means the JSON shape does not fit the slot; callers turn that
/// into [`StateError::InvalidValue`] with the field name attached.
pub trait FieldValue: Sized {
    fn from_json(value: &Value) -> Option<Self>;
}

impl FieldValue for bool {
    fn from_json(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FieldValue for f64 {
    fn from_json(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FieldValue for String {
    fn from_json(value: &Value) -> Option<Self> {
        value.as_str().map(ToOwned::to_owned)
    }
}

/// Null-capable slots: JSON null is a valid value, not a shape error.
impl<T: FieldValue> FieldValue for Option<T> {
    fn from_json(value: &Value) -> Option<Self> {
        if value.is_null() {
            Some(None)
        } else {
            T::from_json(value).map(Some)
        }
    }
}

// ── Datum ────────────────────────────────────────────────────────────

/// One sensor reading plus the instant it was last updated.
///
/// The timestamp is absent until first observed (`lastUpdated: null`
/// on the wire). Value and timestamp are only ever written together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Datum<T> {
    pub value: T,
    pub last_updated: Option<DateTime<Utc>>,
}

impl<T: FieldValue> Datum<T> {
    /// Build from a raw `{value, lastUpdated}` pair.
    ///
    /// A null `lastUpdated` yields a `None` timestamp, not an error;
    /// non-null text must be valid ISO-8601.
    pub(crate) fn from_point(field: &'static str, point: &StatePoint) -> Result<Self, StateError> {
        let value = T::from_json(&point.value).ok_or_else(|| StateError::InvalidValue {
            field: field.to_owned(),
            value: point.value.clone(),
        })?;
        let last_updated = parse_instant(field, point.last_updated.as_deref())?;
        Ok(Self {
            value,
            last_updated,
        })
    }

    /// Overwrite value and timestamp together from a stream change.
    pub(crate) fn patch(
        &mut self,
        field: &str,
        value: &Value,
        last_updated: Option<DateTime<Utc>>,
    ) -> Result<(), StateError> {
        let value = T::from_json(value).ok_or_else(|| StateError::InvalidValue {
            field: field.to_owned(),
            value: value.clone(),
        })?;
        self.value = value;
        self.last_updated = last_updated;
        Ok(())
    }
}

impl<T> Datum<Option<T>> {
    /// The not-yet-observed pair `(null, null)` for fields older
    /// payloads omit entirely.
    pub(crate) fn absent() -> Self {
        Self {
            value: None,
            last_updated: None,
        }
    }
}

/// Parse an ISO-8601 timestamp into a timezone-aware instant.
/// `None` in, `None` out.
pub(crate) fn parse_instant(
    field: &str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>, StateError> {
    match raw {
        None => Ok(None),
        Some(text) => DateTime::parse_from_rfc3339(text)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| StateError::InvalidTimestamp {
                field: field.to_owned(),
                raw: text.to_owned(),
            }),
    }
}

// ── Payload access helpers ───────────────────────────────────────────

/// The `{value, lastUpdated}` pair for `field` inside `feature`, or a
/// missing-field error naming both.
fn required<'a>(
    features: &'a FeatureMap,
    feature: &'static str,
    field: &'static str,
) -> Result<&'a StatePoint, StateError> {
    features
        .get(feature)
        .ok_or(StateError::MissingFeature { feature })?
        .states
        .get(field)
        .ok_or(StateError::MissingField { feature, field })
}

/// Like [`required`], but an absent field is `None` rather than an error.
fn optional<'a>(
    features: &'a FeatureMap,
    feature: &'static str,
    field: &'static str,
) -> Result<Option<&'a StatePoint>, StateError> {
    Ok(features
        .get(feature)
        .ok_or(StateError::MissingFeature { feature })?
        .states
        .get(field))
}

// ── Alarm states ─────────────────────────────────────────────────────

/// Contact/tamper alarm -- window and entry sensors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasicAlarmState {
    pub alarm: Datum<bool>,
    pub tamper: Datum<bool>,
}

impl BasicAlarmState {
    pub(crate) fn from_features(features: &FeatureMap) -> Result<Self, StateError> {
        Ok(Self {
            alarm: Datum::from_point("alarm", required(features, "alarm", "alarm")?)?,
            tamper: Datum::from_point("tamper", required(features, "alarm", "tamper")?)?,
        })
    }

    pub(crate) fn apply(
        &mut self,
        field: &str,
        value: &Value,
        last_updated: Option<DateTime<Utc>>,
    ) -> Result<(), StateError> {
        match field {
            "alarm" => self.alarm.patch(field, value, last_updated),
            "tamper" => self.tamper.patch(field, value, last_updated),
            _ => Err(StateError::UnknownField {
                feature: "alarm",
                field: field.to_owned(),
            }),
        }
    }
}

/// Fire alarm -- smoke and heat alarms.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmokeAlarmState {
    pub fire: Datum<bool>,
}

impl SmokeAlarmState {
    pub(crate) fn from_features(features: &FeatureMap) -> Result<Self, StateError> {
        Ok(Self {
            fire: Datum::from_point("fire", required(features, "alarm", "fire")?)?,
        })
    }

    pub(crate) fn apply(
        &mut self,
        field: &str,
        value: &Value,
        last_updated: Option<DateTime<Utc>>,
    ) -> Result<(), StateError> {
        match field {
            "fire" => self.fire.patch(field, value, last_updated),
            _ => Err(StateError::UnknownField {
                feature: "alarm",
                field: field.to_owned(),
            }),
        }
    }
}

/// Flood alarm -- water leak detectors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FloodAlarmState {
    pub flood: Datum<bool>,
}

impl FloodAlarmState {
    pub(crate) fn from_features(features: &FeatureMap) -> Result<Self, StateError> {
        Ok(Self {
            flood: Datum::from_point("flood", required(features, "alarm", "flood")?)?,
        })
    }

    pub(crate) fn apply(
        &mut self,
        field: &str,
        value: &Value,
        last_updated: Option<DateTime<Utc>>,
    ) -> Result<(), StateError> {
        match field {
            "flood" => self.flood.patch(field, value, last_updated),
            _ => Err(StateError::UnknownField {
                feature: "alarm",
                field: field.to_owned(),
            }),
        }
    }
}

/// Motion alarm: the basic alarm pair plus a sensitivity level.
///
/// Shared fields live in the embedded [`BasicAlarmState`]; construction
/// and field dispatch delegate there for the common prefix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotionAlarmState {
    pub base: BasicAlarmState,
    pub sensitivity_level: Datum<Option<f64>>,
}

impl MotionAlarmState {
    pub(crate) fn from_features(features: &FeatureMap) -> Result<Self, StateError> {
        Ok(Self {
            base: BasicAlarmState::from_features(features)?,
            sensitivity_level: Datum::from_point(
                "sensitivitylevel",
                required(features, "alarm", "sensitivitylevel")?,
            )?,
        })
    }

    pub(crate) fn apply(
        &mut self,
        field: &str,
        value: &Value,
        last_updated: Option<DateTime<Utc>>,
    ) -> Result<(), StateError> {
        match field {
            "sensitivitylevel" => self.sensitivity_level.patch(field, value, last_updated),
            _ => self.base.apply(field, value, last_updated),
        }
    }
}

// ── Battery ──────────────────────────────────────────────────────────

/// Battery condition. `defect` is entirely absent in older payloads,
/// which reads as a never-observed `(null, null)` pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatteryState {
    pub low: Datum<bool>,
    pub voltage: Datum<f64>,
    pub defect: Datum<Option<bool>>,
}

impl BatteryState {
    pub(crate) fn from_features(features: &FeatureMap) -> Result<Self, StateError> {
        let defect = match optional(features, "battery", "defect")? {
            Some(point) => Datum::from_point("defect", point)?,
            None => Datum::absent(),
        };
        Ok(Self {
            low: Datum::from_point("low", required(features, "battery", "low")?)?,
            voltage: Datum::from_point("voltage", required(features, "battery", "voltage")?)?,
            defect,
        })
    }

    pub(crate) fn apply(
        &mut self,
        field: &str,
        value: &Value,
        last_updated: Option<DateTime<Utc>>,
    ) -> Result<(), StateError> {
        match field {
            "low" => self.low.patch(field, value, last_updated),
            "voltage" => self.voltage.patch(field, value, last_updated),
            "defect" => self.defect.patch(field, value, last_updated),
            _ => Err(StateError::UnknownField {
                feature: "battery",
                field: field.to_owned(),
            }),
        }
    }
}

// ── Temperature ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperatureState {
    pub temperature: Datum<f64>,
}

impl TemperatureState {
    pub(crate) fn from_features(features: &FeatureMap) -> Result<Self, StateError> {
        Ok(Self {
            temperature: Datum::from_point(
                "temperature",
                required(features, "temperature", "temperature")?,
            )?,
        })
    }

    pub(crate) fn apply(
        &mut self,
        field: &str,
        value: &Value,
        last_updated: Option<DateTime<Utc>>,
    ) -> Result<(), StateError> {
        match field {
            "temperature" => self.temperature.patch(field, value, last_updated),
            _ => Err(StateError::UnknownField {
                feature: "temperature",
                field: field.to_owned(),
            }),
        }
    }
}

// ── Diagnostics ──────────────────────────────────────────────────────

/// Network link diagnostics reported by every sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticState {
    pub network_link_address: Datum<String>,
    pub network_link_strength: Datum<f64>,
}

impl DiagnosticState {
    pub(crate) fn from_features(features: &FeatureMap) -> Result<Self, StateError> {
        Ok(Self {
            network_link_address: Datum::from_point(
                "networklinkaddress",
                required(features, "diagnostic", "networklinkaddress")?,
            )?,
            network_link_strength: Datum::from_point(
                "networklinkstrength",
                required(features, "diagnostic", "networklinkstrength")?,
            )?,
        })
    }

    pub(crate) fn apply(
        &mut self,
        field: &str,
        value: &Value,
        last_updated: Option<DateTime<Utc>>,
    ) -> Result<(), StateError> {
        match field {
            "networklinkaddress" => {
                self.network_link_address.patch(field, value, last_updated)
            }
            "networklinkstrength" => {
                self.network_link_strength.patch(field, value, last_updated)
            }
            _ => Err(StateError::UnknownField {
                feature: "diagnostic",
                field: field.to_owned(),
            }),
        }
    }
}

// ── Metering ─────────────────────────────────────────────────────────

/// Power metering readings from the HAN port sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeteringState {
    pub summation_delivered: Datum<f64>,
    pub summation_received: Datum<f64>,
    pub demand: Datum<f64>,
    pub check: Datum<bool>,
}

impl MeteringState {
    pub(crate) fn from_features(features: &FeatureMap) -> Result<Self, StateError> {
        Ok(Self {
            summation_delivered: Datum::from_point(
                "summationdelivered",
                required(features, "metering", "summationdelivered")?,
            )?,
            summation_received: Datum::from_point(
                "summationreceived",
                required(features, "metering", "summationreceived")?,
            )?,
            demand: Datum::from_point("demand", required(features, "metering", "demand")?)?,
            check: Datum::from_point("check", required(features, "metering", "check")?)?,
        })
    }

    pub(crate) fn apply(
        &mut self,
        field: &str,
        value: &Value,
        last_updated: Option<DateTime<Utc>>,
    ) -> Result<(), StateError> {
        match field {
            "summationdelivered" => self.summation_delivered.patch(field, value, last_updated),
            "summationreceived" => self.summation_received.patch(field, value, last_updated),
            "demand" => self.demand.patch(field, value, last_updated),
            "check" => self.check.patch(field, value, last_updated),
            _ => Err(StateError::UnknownField {
                feature: "metering",
                field: field.to_owned(),
            }),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn features(value: serde_json::Value) -> FeatureMap {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn datum_parses_value_and_timestamp() {
        let features = features(json!({
            "temperature": {
                "states": {
                    "temperature": {"value": 16, "lastUpdated": "2022-12-31T16:26:12.692Z"}
                }
            }
        }));

        let state = TemperatureState::from_features(&features).unwrap();
        assert_eq!(state.temperature.value, 16.0);
        assert_eq!(
            state.temperature.last_updated.unwrap(),
            Utc.with_ymd_and_hms(2022, 12, 31, 16, 26, 12).unwrap()
                + chrono::Duration::milliseconds(692)
        );
    }

    #[test]
    fn null_last_updated_is_not_an_error() {
        let features = features(json!({
            "alarm": {
                "states": {
                    "alarm": {"value": true, "lastUpdated": "2022-12-31T16:28:43.861Z"},
                    "tamper": {"value": false, "lastUpdated": "2022-06-10T16:17:58.161Z"},
                    "sensitivitylevel": {"value": null, "lastUpdated": null},
                }
            }
        }));

        let state = MotionAlarmState::from_features(&features).unwrap();
        assert_eq!(state.sensitivity_level.value, None);
        assert_eq!(state.sensitivity_level.last_updated, None);
        assert!(state.base.alarm.value);
    }

    #[test]
    fn garbled_timestamp_is_a_construction_error() {
        let features = features(json!({
            "temperature": {
                "states": {
                    "temperature": {"value": 16, "lastUpdated": "half past twelve"}
                }
            }
        }));

        let err = TemperatureState::from_features(&features).unwrap_err();
        assert!(matches!(err, StateError::InvalidTimestamp { .. }));
    }

    #[test]
    fn missing_required_field_is_a_construction_error() {
        let features = features(json!({
            "battery": {
                "states": {
                    "low": {"value": false, "lastUpdated": "2022-06-10T15:29:20.956Z"}
                }
            }
        }));

        let err = BatteryState::from_features(&features).unwrap_err();
        assert!(matches!(
            err,
            StateError::MissingField {
                feature: "battery",
                field: "voltage"
            }
        ));
    }

    #[test]
    fn absent_defect_reads_as_never_observed() {
        let features = features(json!({
            "battery": {
                "states": {
                    "low": {"value": false, "lastUpdated": "2023-05-17T09:20:46.850Z"},
                    "voltage": {"value": 3, "lastUpdated": "2023-05-17T10:36:16.891Z"},
                }
            }
        }));

        let state = BatteryState::from_features(&features).unwrap();
        assert_eq!(state.defect.value, None);
        assert_eq!(state.defect.last_updated, None);
        assert_eq!(state.voltage.value, 3.0);
    }

    #[test]
    fn motion_alarm_delegates_shared_fields_to_base() {
        let features = features(json!({
            "alarm": {
                "states": {
                    "alarm": {"value": false, "lastUpdated": "2023-06-09T18:21:11.541Z"},
                    "tamper": {"value": false, "lastUpdated": "2023-05-01T17:00:41.908Z"},
                    "sensitivitylevel": {"value": 3, "lastUpdated": "2023-05-01T17:00:41.742Z"},
                }
            }
        }));

        let mut state = MotionAlarmState::from_features(&features).unwrap();
        assert_eq!(state.sensitivity_level.value, Some(3.0));

        let ts = Utc.with_ymd_and_hms(2023, 6, 10, 0, 0, 0).unwrap();
        state.apply("alarm", &json!(true), Some(ts)).unwrap();
        assert!(state.base.alarm.value);
        assert_eq!(state.base.alarm.last_updated, Some(ts));
    }

    #[test]
    fn unknown_field_is_a_table_miss() {
        let features = features(json!({
            "temperature": {
                "states": {
                    "temperature": {"value": 21.9, "lastUpdated": "2023-06-08T15:58:39.078Z"}
                }
            }
        }));

        let mut state = TemperatureState::from_features(&features).unwrap();
        let err = state.apply("humidity", &json!(55), None).unwrap_err();
        assert!(matches!(err, StateError::UnknownField { .. }));
        // The known field is untouched.
        assert_eq!(state.temperature.value, 21.9);
    }

    #[test]
    fn wrong_value_shape_is_rejected() {
        let features = features(json!({
            "temperature": {
                "states": {
                    "temperature": {"value": 21.9, "lastUpdated": "2023-06-08T15:58:39.078Z"}
                }
            }
        }));

        let mut state = TemperatureState::from_features(&features).unwrap();
        let err = state
            .apply("temperature", &json!("warm"), None)
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidValue { .. }));
        assert_eq!(state.temperature.value, 21.9);
    }

    #[test]
    fn feature_parses_from_wire_names() {
        assert_eq!("battery".parse::<Feature>().unwrap(), Feature::Battery);
        assert_eq!("alarm".parse::<Feature>().unwrap(), Feature::Alarm);
        assert!("thermostat".parse::<Feature>().is_err());
        assert_eq!(Feature::Diagnostic.to_string(), "diagnostic");
    }
}
