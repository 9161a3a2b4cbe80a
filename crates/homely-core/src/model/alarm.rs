// ── Site alarm state ──
//
// The server owns the alarm state machine; this client mirrors it
// without validating transitions. The enum is deliberately open: the
// vocabulary has drifted across server revisions (ARMED_PARTLY vs
// ARMED_STAY), so an unrecognized value is stored verbatim rather
// than rejected.

use serde::Serialize;
use strum::{Display, EnumString};

/// Site-level alarm state with a known-values subset and a passthrough
/// for anything the server invents later.
///
/// Serializes to the wire spelling via `Display`.
#[derive(Debug, Clone, PartialEq, Eq, Display, EnumString, Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(into = "String")]
pub enum AlarmState {
    Disarmed,
    ArmedAway,
    ArmedNight,
    ArmedStay,
    ArmedPartly,
    Breached,
    AlarmPending,
    AlarmStayPending,
    ArmPending,
    ArmNightPending,
    ArmStayPending,
    /// Any value this client does not recognize, kept as the server
    /// spelled it.
    #[strum(default, to_string = "{0}")]
    Unknown(String),
}

impl From<AlarmState> for String {
    fn from(state: AlarmState) -> Self {
        state.to_string()
    }
}

impl AlarmState {
    /// Decode a wire value. Never fails: unrecognized input lands in
    /// [`Unknown`](Self::Unknown).
    pub fn from_wire(raw: &str) -> Self {
        raw.parse()
            .unwrap_or_else(|_| Self::Unknown(raw.to_owned()))
    }

    /// Whether the value is in this client's known vocabulary.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }

    /// Whether the site is in any armed or arming state.
    pub fn is_armed(&self) -> bool {
        matches!(
            self,
            Self::ArmedAway
                | Self::ArmedNight
                | Self::ArmedStay
                | Self::ArmedPartly
                | Self::ArmPending
                | Self::ArmNightPending
                | Self::ArmStayPending
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn known_values_round_trip() {
        assert_eq!(AlarmState::from_wire("DISARMED"), AlarmState::Disarmed);
        assert_eq!(AlarmState::from_wire("ARMED_AWAY"), AlarmState::ArmedAway);
        assert_eq!(AlarmState::from_wire("BREACHED"), AlarmState::Breached);
        assert_eq!(AlarmState::Breached.to_string(), "BREACHED");
        assert_eq!(AlarmState::ArmedNight.to_string(), "ARMED_NIGHT");
    }

    #[test]
    fn both_partly_and_stay_spellings_are_known() {
        assert!(AlarmState::from_wire("ARMED_PARTLY").is_known());
        assert!(AlarmState::from_wire("ARMED_STAY").is_known());
    }

    #[test]
    fn startling_value_is_stored_not_rejected() {
        let state = AlarmState::from_wire("ARMED_VACATION");
        assert_eq!(state, AlarmState::Unknown("ARMED_VACATION".to_owned()));
        assert!(!state.is_known());
        assert_eq!(state.to_string(), "ARMED_VACATION");
    }

    #[test]
    fn armed_covers_arming_transitions() {
        assert!(AlarmState::ArmedPartly.is_armed());
        assert!(AlarmState::ArmNightPending.is_armed());
        assert!(!AlarmState::Disarmed.is_armed());
        assert!(!AlarmState::Breached.is_armed());
    }
}
