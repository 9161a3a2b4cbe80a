// ── Core error types ──
//
// Domain-facing errors from homely-core. Consumers never see raw HTTP
// status codes or JSON parse failures directly -- the
// `From<homely_api::Error>` impl translates transport-layer errors
// into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Data errors ──────────────────────────────────────────────────
    /// The model registry has no entry for this vendor model name.
    ///
    /// Recoverable at per-device granularity: location building skips
    /// the offending entry and keeps going.
    #[error("Unknown device model: '{model_name}'")]
    UnknownDevice { model_name: String },

    /// A state record could not be built or patched.
    ///
    /// During location building this is a hard failure for the device
    /// in question -- a *recognized* model whose payload violates the
    /// schema is a bug worth surfacing, not skipping.
    #[error(transparent)]
    State(#[from] StateError),

    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach the Homely cloud: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure while constructing a state record from a feature payload or
/// applying a field-level change to one.
#[derive(Debug, Error)]
pub enum StateError {
    /// A feature block the device's variant requires is absent.
    #[error("feature '{feature}' missing from payload")]
    MissingFeature { feature: &'static str },

    /// A required field is absent from an otherwise-present feature block.
    #[error("field '{field}' missing from feature '{feature}'")]
    MissingField {
        feature: &'static str,
        field: &'static str,
    },

    /// A field value has the wrong JSON shape for its typed slot.
    #[error("field '{field}' has unusable value: {value}")]
    InvalidValue {
        field: String,
        value: serde_json::Value,
    },

    /// A `lastUpdated` string is not valid ISO-8601.
    #[error("field '{field}' has unparseable timestamp '{raw}'")]
    InvalidTimestamp { field: String, raw: String },

    /// A stream change names a feature this device does not declare.
    #[error("device has no feature '{feature}'")]
    UnknownFeature { feature: String },

    /// A stream change names a field this feature does not declare.
    #[error("feature '{feature}' has no field '{field}'")]
    UnknownField { feature: &'static str, field: String },
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<homely_api::Error> for CoreError {
    fn from(err: homely_api::Error) -> Self {
        match err {
            homely_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            homely_api::Error::NotAuthenticated => CoreError::AuthenticationFailed {
                message: "not authenticated".into(),
            },
            homely_api::Error::Transport(ref e) => {
                if e.is_timeout() || e.is_connect() {
                    CoreError::ConnectionFailed {
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            homely_api::Error::InvalidUrl(e) => CoreError::Internal(format!("invalid URL: {e}")),
            homely_api::Error::Api { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            homely_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                reason: format!("event stream connection failed: {reason}"),
            },
            homely_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("deserialization error: {message}"))
            }
        }
    }
}
