// ── Runtime connection configuration ──
//
// Describes *how* to reach the Homely cloud. Carries endpoints and
// timing knobs, but never touches disk -- the embedding application
// constructs an `ApiConfig` and hands it in.

use std::time::Duration;

use url::Url;

/// Configuration for connecting to the Homely SDK cloud.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// REST base URL.
    pub base_url: Url,
    /// WebSocket base URL for the event stream.
    pub ws_url: Url,
    /// Request timeout for REST calls.
    pub timeout: Duration,
    /// Safety margin subtracted from token lifetimes: a token is treated
    /// as expired this long before the server would expire it, so a
    /// request never goes out with a token about to lapse mid-flight.
    pub token_refresh_margin: Duration,
    /// Fixed delay between stream reconnection attempts.
    pub reconnect_delay: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://sdk.iotiliti.cloud").expect("static URL is valid"),
            ws_url: Url::parse("wss://sdk.iotiliti.cloud").expect("static URL is valid"),
            timeout: Duration::from_secs(30),
            token_refresh_margin: Duration::from_secs(2),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}
