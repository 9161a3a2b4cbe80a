//! Device catalog: the closed set of device variants, the vendor
//! model-name registry, and the factory that builds a fully-typed
//! device from a raw payload.
//!
//! Adding a device kind is a compile-time-checked addition: a new
//! [`DeviceModel`] variant, a registry row, and a [`DeviceStates`]
//! variant declaring its state slots. Every `match` below is
//! exhaustive, so the compiler walks you through the rest.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use homely_api::stream::StateChange;
use homely_api::types::RawDevice;

use crate::error::{CoreError, StateError};
use crate::model::state::{
    parse_instant, BasicAlarmState, BatteryState, DiagnosticState, Feature, FloodAlarmState,
    MeteringState, MotionAlarmState, SmokeAlarmState, TemperatureState,
};

// ── Model registry ───────────────────────────────────────────────────

/// Device family -- one entry per distinct combination of state slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceModel {
    WindowSensor,
    SmokeAlarm,
    HeatAlarm,
    MotionSensor,
    WaterLeakDetector,
    PowerMeter,
}

impl DeviceModel {
    /// Look up a vendor model name. `None` is the unknown-device path;
    /// callers skip that entry and keep processing the batch.
    pub fn from_model_name(name: &str) -> Option<Self> {
        match name {
            "Window Sensor" | "Window Alarm Sensor" | "Alarm Entry Sensor 2" => {
                Some(Self::WindowSensor)
            }
            "Smoke Alarm" | "Intelligent Smoke Alarm" => Some(Self::SmokeAlarm),
            "Heat Alarm" | "Intelligent Heat Alarm" => Some(Self::HeatAlarm),
            "Motion Sensor Mini" | "Motion Sensor 2 Alarm" | "Alarm Motion Sensor 2" => {
                Some(Self::MotionSensor)
            }
            "Water Leak Detector" => Some(Self::WaterLeakDetector),
            "EMI Norwegian HAN" => Some(Self::PowerMeter),
            _ => None,
        }
    }

    /// The feature slots this family declares.
    pub fn features(self) -> &'static [Feature] {
        match self {
            Self::WindowSensor
            | Self::SmokeAlarm
            | Self::HeatAlarm
            | Self::MotionSensor
            | Self::WaterLeakDetector => &[
                Feature::Battery,
                Feature::Diagnostic,
                Feature::Temperature,
                Feature::Alarm,
            ],
            Self::PowerMeter => &[Feature::Diagnostic, Feature::Metering],
        }
    }
}

// ── Device states ────────────────────────────────────────────────────

/// The state tuple a device exclusively owns, fixed per family.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DeviceStates {
    WindowSensor {
        battery: BatteryState,
        diagnostic: DiagnosticState,
        temperature: TemperatureState,
        alarm: BasicAlarmState,
    },
    SmokeAlarm {
        battery: BatteryState,
        diagnostic: DiagnosticState,
        temperature: TemperatureState,
        alarm: SmokeAlarmState,
    },
    HeatAlarm {
        battery: BatteryState,
        diagnostic: DiagnosticState,
        temperature: TemperatureState,
        alarm: SmokeAlarmState,
    },
    MotionSensor {
        battery: BatteryState,
        diagnostic: DiagnosticState,
        temperature: TemperatureState,
        alarm: MotionAlarmState,
    },
    WaterLeakDetector {
        battery: BatteryState,
        diagnostic: DiagnosticState,
        temperature: TemperatureState,
        alarm: FloodAlarmState,
    },
    PowerMeter {
        diagnostic: DiagnosticState,
        metering: MeteringState,
    },
}

impl DeviceStates {
    /// Construct every state slot the family declares from the feature
    /// subtrees of a raw device payload.
    fn from_features(
        model: DeviceModel,
        features: &homely_api::types::FeatureMap,
    ) -> Result<Self, StateError> {
        match model {
            DeviceModel::WindowSensor => Ok(Self::WindowSensor {
                battery: BatteryState::from_features(features)?,
                diagnostic: DiagnosticState::from_features(features)?,
                temperature: TemperatureState::from_features(features)?,
                alarm: BasicAlarmState::from_features(features)?,
            }),
            DeviceModel::SmokeAlarm => Ok(Self::SmokeAlarm {
                battery: BatteryState::from_features(features)?,
                diagnostic: DiagnosticState::from_features(features)?,
                temperature: TemperatureState::from_features(features)?,
                alarm: SmokeAlarmState::from_features(features)?,
            }),
            DeviceModel::HeatAlarm => Ok(Self::HeatAlarm {
                battery: BatteryState::from_features(features)?,
                diagnostic: DiagnosticState::from_features(features)?,
                temperature: TemperatureState::from_features(features)?,
                alarm: SmokeAlarmState::from_features(features)?,
            }),
            DeviceModel::MotionSensor => Ok(Self::MotionSensor {
                battery: BatteryState::from_features(features)?,
                diagnostic: DiagnosticState::from_features(features)?,
                temperature: TemperatureState::from_features(features)?,
                alarm: MotionAlarmState::from_features(features)?,
            }),
            DeviceModel::WaterLeakDetector => Ok(Self::WaterLeakDetector {
                battery: BatteryState::from_features(features)?,
                diagnostic: DiagnosticState::from_features(features)?,
                temperature: TemperatureState::from_features(features)?,
                alarm: FloodAlarmState::from_features(features)?,
            }),
            DeviceModel::PowerMeter => Ok(Self::PowerMeter {
                diagnostic: DiagnosticState::from_features(features)?,
                metering: MeteringState::from_features(features)?,
            }),
        }
    }

    /// The family this state tuple belongs to.
    pub fn model(&self) -> DeviceModel {
        match self {
            Self::WindowSensor { .. } => DeviceModel::WindowSensor,
            Self::SmokeAlarm { .. } => DeviceModel::SmokeAlarm,
            Self::HeatAlarm { .. } => DeviceModel::HeatAlarm,
            Self::MotionSensor { .. } => DeviceModel::MotionSensor,
            Self::WaterLeakDetector { .. } => DeviceModel::WaterLeakDetector,
            Self::PowerMeter { .. } => DeviceModel::PowerMeter,
        }
    }

    /// Route one stream change onto the owning state record.
    ///
    /// Resolves the feature name against this variant's declared slots,
    /// then field-dispatches within the slot. A feature or field this
    /// variant does not declare is a miss, reported as an error for the
    /// caller to skip -- never a panic, never a partial write.
    pub(crate) fn apply_change(&mut self, change: &StateChange) -> Result<Feature, StateError> {
        let feature: Feature =
            change
                .feature
                .parse()
                .map_err(|_| StateError::UnknownFeature {
                    feature: change.feature.clone(),
                })?;

        // Timestamp parsed up front so a garbled change leaves the
        // state untouched.
        let last_updated = parse_instant(&change.state_name, change.last_updated.as_deref())?;
        let field = change.state_name.as_str();
        let value: &Value = &change.value;

        match (self, feature) {
            (Self::WindowSensor { battery, .. }, Feature::Battery)
            | (Self::SmokeAlarm { battery, .. }, Feature::Battery)
            | (Self::HeatAlarm { battery, .. }, Feature::Battery)
            | (Self::MotionSensor { battery, .. }, Feature::Battery)
            | (Self::WaterLeakDetector { battery, .. }, Feature::Battery) => {
                battery.apply(field, value, last_updated)?;
            }

            (Self::WindowSensor { diagnostic, .. }, Feature::Diagnostic)
            | (Self::SmokeAlarm { diagnostic, .. }, Feature::Diagnostic)
            | (Self::HeatAlarm { diagnostic, .. }, Feature::Diagnostic)
            | (Self::MotionSensor { diagnostic, .. }, Feature::Diagnostic)
            | (Self::WaterLeakDetector { diagnostic, .. }, Feature::Diagnostic)
            | (Self::PowerMeter { diagnostic, .. }, Feature::Diagnostic) => {
                diagnostic.apply(field, value, last_updated)?;
            }

            (Self::WindowSensor { temperature, .. }, Feature::Temperature)
            | (Self::SmokeAlarm { temperature, .. }, Feature::Temperature)
            | (Self::HeatAlarm { temperature, .. }, Feature::Temperature)
            | (Self::MotionSensor { temperature, .. }, Feature::Temperature)
            | (Self::WaterLeakDetector { temperature, .. }, Feature::Temperature) => {
                temperature.apply(field, value, last_updated)?;
            }

            (Self::WindowSensor { alarm, .. }, Feature::Alarm) => {
                alarm.apply(field, value, last_updated)?;
            }
            (Self::SmokeAlarm { alarm, .. }, Feature::Alarm)
            | (Self::HeatAlarm { alarm, .. }, Feature::Alarm) => {
                alarm.apply(field, value, last_updated)?;
            }
            (Self::MotionSensor { alarm, .. }, Feature::Alarm) => {
                alarm.apply(field, value, last_updated)?;
            }
            (Self::WaterLeakDetector { alarm, .. }, Feature::Alarm) => {
                alarm.apply(field, value, last_updated)?;
            }

            (Self::PowerMeter { metering, .. }, Feature::Metering) => {
                metering.apply(field, value, last_updated)?;
            }

            // Feature is valid globally but not declared by this variant.
            _ => {
                return Err(StateError::UnknownFeature {
                    feature: change.feature.clone(),
                })
            }
        }

        Ok(feature)
    }

    // ── Typed slot accessors ─────────────────────────────────────────

    pub fn battery(&self) -> Option<&BatteryState> {
        match self {
            Self::WindowSensor { battery, .. }
            | Self::SmokeAlarm { battery, .. }
            | Self::HeatAlarm { battery, .. }
            | Self::MotionSensor { battery, .. }
            | Self::WaterLeakDetector { battery, .. } => Some(battery),
            Self::PowerMeter { .. } => None,
        }
    }

    pub fn diagnostic(&self) -> &DiagnosticState {
        match self {
            Self::WindowSensor { diagnostic, .. }
            | Self::SmokeAlarm { diagnostic, .. }
            | Self::HeatAlarm { diagnostic, .. }
            | Self::MotionSensor { diagnostic, .. }
            | Self::WaterLeakDetector { diagnostic, .. }
            | Self::PowerMeter { diagnostic, .. } => diagnostic,
        }
    }

    pub fn temperature(&self) -> Option<&TemperatureState> {
        match self {
            Self::WindowSensor { temperature, .. }
            | Self::SmokeAlarm { temperature, .. }
            | Self::HeatAlarm { temperature, .. }
            | Self::MotionSensor { temperature, .. }
            | Self::WaterLeakDetector { temperature, .. } => Some(temperature),
            Self::PowerMeter { .. } => None,
        }
    }

    pub fn metering(&self) -> Option<&MeteringState> {
        match self {
            Self::PowerMeter { metering, .. } => Some(metering),
            _ => None,
        }
    }

    /// The contact/tamper alarm pair, where the variant has one --
    /// directly on entry sensors, embedded on motion sensors.
    pub fn basic_alarm(&self) -> Option<&BasicAlarmState> {
        match self {
            Self::WindowSensor { alarm, .. } => Some(alarm),
            Self::MotionSensor { alarm, .. } => Some(&alarm.base),
            _ => None,
        }
    }

    pub fn smoke_alarm(&self) -> Option<&SmokeAlarmState> {
        match self {
            Self::SmokeAlarm { alarm, .. } | Self::HeatAlarm { alarm, .. } => Some(alarm),
            _ => None,
        }
    }

    pub fn flood_alarm(&self) -> Option<&FloodAlarmState> {
        match self {
            Self::WaterLeakDetector { alarm, .. } => Some(alarm),
            _ => None,
        }
    }

    pub fn motion_alarm(&self) -> Option<&MotionAlarmState> {
        match self {
            Self::MotionSensor { alarm, .. } => Some(alarm),
            _ => None,
        }
    }
}

// ── Device ───────────────────────────────────────────────────────────

/// One physical sensor/actuator: identity fields plus the state tuple
/// its family declares. Created per REST fetch, patched field-by-field
/// by stream events, dropped when the location is rebuilt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    /// Opaque identifier, stable for the device's lifetime.
    pub id: String,
    pub name: String,
    pub serial_number: String,
    /// Parent location name within the site.
    pub location: String,
    pub online: bool,
    pub model_id: String,
    /// Vendor model name -- the registry dispatch key.
    pub model_name: String,
    pub states: DeviceStates,
}

impl Device {
    /// Build a fully-typed device from a raw payload.
    ///
    /// Fails with [`CoreError::UnknownDevice`] for an unrecognized
    /// model name, or [`CoreError::State`] when a recognized model's
    /// payload is missing a required field.
    pub fn from_rest(raw: &RawDevice) -> Result<Self, CoreError> {
        let model =
            DeviceModel::from_model_name(&raw.model_name).ok_or_else(|| {
                CoreError::UnknownDevice {
                    model_name: raw.model_name.clone(),
                }
            })?;

        let states = DeviceStates::from_features(model, &raw.features)?;

        Ok(Self {
            id: raw.id.clone(),
            name: raw.name.clone(),
            serial_number: raw.serial_number.clone(),
            location: raw.location.clone(),
            online: raw.online,
            model_id: raw.model_id.clone(),
            model_name: raw.model_name.clone(),
            states,
        })
    }

    pub fn model(&self) -> DeviceModel {
        self.states.model()
    }

    /// The gateway-reported instant of the most recent update across
    /// all of this device's state fields.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        let mut latest: Option<DateTime<Utc>> = None;
        let mut consider = |ts: Option<DateTime<Utc>>| {
            if let Some(ts) = ts {
                if latest.is_none_or(|cur| ts > cur) {
                    latest = Some(ts);
                }
            }
        };

        if let Some(battery) = self.states.battery() {
            consider(battery.low.last_updated);
            consider(battery.voltage.last_updated);
            consider(battery.defect.last_updated);
        }
        let diagnostic = self.states.diagnostic();
        consider(diagnostic.network_link_address.last_updated);
        consider(diagnostic.network_link_strength.last_updated);
        if let Some(temperature) = self.states.temperature() {
            consider(temperature.temperature.last_updated);
        }
        if let Some(alarm) = self.states.basic_alarm() {
            consider(alarm.alarm.last_updated);
            consider(alarm.tamper.last_updated);
        }
        if let Some(alarm) = self.states.motion_alarm() {
            consider(alarm.sensitivity_level.last_updated);
        }
        if let Some(alarm) = self.states.smoke_alarm() {
            consider(alarm.fire.last_updated);
        }
        if let Some(alarm) = self.states.flood_alarm() {
            consider(alarm.flood.last_updated);
        }
        if let Some(metering) = self.states.metering() {
            consider(metering.summation_delivered.last_updated);
            consider(metering.summation_received.last_updated);
            consider(metering.demand.last_updated);
            consider(metering.check.last_updated);
        }

        latest
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} in {}", self.name, self.location)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
