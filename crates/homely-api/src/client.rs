// Async HTTP client for the Homely SDK REST API.
//
// Endpoints live under https://sdk.iotiliti.cloud/homely/. Every request
// fetches a fresh bearer header right before it goes out; token rotation
// is handled in `auth.rs`.

use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::auth::{Credentials, TokenState};
use crate::config::ApiConfig;
use crate::error::Error;
use crate::types::{HomeResponse, LocationEntry};

pub(crate) const AUTH_ENDPOINT: &str = "/homely/oauth/token";
pub(crate) const REFRESH_ENDPOINT: &str = "/homely/oauth/refresh-token";
const LOCATIONS_ENDPOINT: &str = "/homely/locations";
const SINGLE_LOCATION_ENDPOINT: &str = "/homely/home";

/// Async client for the Homely cloud REST API.
///
/// Owns the HTTP connection pool, the account credentials, and the
/// current token pair. Wrap in an `Arc` to share with the event stream.
pub struct HomelyClient {
    http: reqwest::Client,
    config: ApiConfig,
    credentials: Credentials,
    token: Mutex<Option<TokenState>>,
}

impl HomelyClient {
    /// Build a client from credentials and configuration.
    ///
    /// Does not authenticate -- the first request (or an explicit
    /// [`authenticate`](Self::authenticate) call) performs the login.
    pub fn new(credentials: Credentials, config: ApiConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("homely-rs/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            config,
            credentials,
            token: Mutex::new(None),
        })
    }

    /// Wrap an existing `reqwest::Client` (timeouts managed by caller).
    pub fn from_reqwest(
        http: reqwest::Client,
        credentials: Credentials,
        config: ApiConfig,
    ) -> Self {
        Self {
            http,
            config,
            credentials,
            token: Mutex::new(None),
        }
    }

    // ── Accessors shared with auth.rs / stream.rs ────────────────────

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub(crate) fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub(crate) fn token(&self) -> &Mutex<Option<TokenState>> {
        &self.token
    }

    /// Join an endpoint path onto the configured base URL.
    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, Error> {
        Ok(self.config.base_url.join(path)?)
    }

    // ── REST fetches ─────────────────────────────────────────────────

    /// List the locations the account can access.
    pub async fn get_locations(&self) -> Result<Vec<LocationEntry>, Error> {
        self.get(LOCATIONS_ENDPOINT).await
    }

    /// Fetch the full state of one location, devices included.
    pub async fn get_home(&self, location_id: &str) -> Result<HomeResponse, Error> {
        self.get(&format!("{SINGLE_LOCATION_ENDPOINT}/{location_id}"))
            .await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.endpoint(path)?;
        let bearer = self.authorization_header().await?;
        debug!("GET {url}");

        let resp = self
            .http
            .get(url)
            .header(AUTHORIZATION, bearer)
            .send()
            .await?;
        Self::handle_response(resp).await
    }

    /// Decode a successful response, or map the status + body into an error.
    async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(Error::Authentication { message });
            }
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}
