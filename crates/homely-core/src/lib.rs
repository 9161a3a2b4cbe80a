// homely-core: Typed device/state model and stream reconciliation
// on top of homely-api.

pub mod error;
pub mod model;
pub mod monitor;
pub mod reconcile;

// ── Primary re-exports ──────────────────────────────────────────────
pub use error::{CoreError, StateError};
pub use monitor::{LocationMonitor, StateUpdate};
pub use reconcile::EventOutcome;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    // Devices
    Device, DeviceModel, DeviceStates,
    // Location aggregate
    AlarmState, LocationSummary, SingleLocation,
    // States
    BasicAlarmState, BatteryState, Datum, DiagnosticState, Feature, FloodAlarmState,
    MeteringState, MotionAlarmState, SmokeAlarmState, TemperatureState,
};
