// ── Domain model ──
//
// The closed, statically verifiable rendition of the Homely payload
// schema: state records with per-field timestamps, the device catalog,
// and the per-site location aggregate.

pub mod alarm;
pub mod device;
pub mod location;
pub mod state;

// ── Re-exports ──────────────────────────────────────────────────────
// Flat access: `use homely_core::model::*` gives you everything.

pub use alarm::AlarmState;
pub use device::{Device, DeviceModel, DeviceStates};
pub use location::{LocationSummary, SingleLocation};
pub use state::{
    BasicAlarmState, BatteryState, Datum, DiagnosticState, Feature, FloodAlarmState,
    MeteringState, MotionAlarmState, SmokeAlarmState, TemperatureState,
};
