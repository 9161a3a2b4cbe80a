// OAuth token lifecycle
//
// Password login and refresh-token rotation against the Homely auth
// endpoints. Token state lives behind a `tokio::Mutex`, so redundant
// concurrent refresh attempts serialize and collapse into no-ops --
// the freshness check runs again under the lock before any request
// goes out.

use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::debug;

use crate::client::{HomelyClient, AUTH_ENDPOINT, REFRESH_ENDPOINT};
use crate::error::Error;
use crate::types::TokenResponse;

/// Account credentials for the Homely cloud.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

// ── Token state ──────────────────────────────────────────────────────

/// How stale the held token pair is, relative to the refresh margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Freshness {
    /// Access token still valid -- use as-is.
    Fresh,
    /// Access token expired (or about to), refresh token still good.
    NeedsRefresh,
    /// Refresh token expired too -- full login required.
    NeedsLogin,
}

/// A granted token pair plus the instant it was issued.
pub(crate) struct TokenState {
    access_token: SecretString,
    refresh_token: SecretString,
    issued_at: Instant,
    expires_in: Duration,
    refresh_expires_in: Duration,
}

impl TokenState {
    pub(crate) fn from_response(resp: TokenResponse) -> Self {
        Self {
            access_token: SecretString::from(resp.access_token),
            refresh_token: SecretString::from(resp.refresh_token),
            issued_at: Instant::now(),
            expires_in: Duration::from_secs(resp.expires_in),
            refresh_expires_in: Duration::from_secs(resp.refresh_expires_in),
        }
    }

    /// Classify the token pair against its lifetimes minus `margin`.
    pub(crate) fn freshness(&self, margin: Duration) -> Freshness {
        let age = self.issued_at.elapsed();
        if age > self.refresh_expires_in.saturating_sub(margin) {
            Freshness::NeedsLogin
        } else if age > self.expires_in.saturating_sub(margin) {
            Freshness::NeedsRefresh
        } else {
            Freshness::Fresh
        }
    }

    /// The `Authorization` header value for the held access token.
    pub(crate) fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.expose_secret())
    }

    fn refresh_token(&self) -> &SecretString {
        &self.refresh_token
    }
}

// ── Auth flow ────────────────────────────────────────────────────────

impl HomelyClient {
    /// Authenticate with username/password, replacing any held tokens.
    ///
    /// The auth endpoint answers a successful grant with HTTP 201.
    pub async fn authenticate(&self) -> Result<(), Error> {
        let state = self.login().await?;
        *self.token().lock().await = Some(state);
        Ok(())
    }

    /// Ensure the held access token is usable, logging in or refreshing
    /// as needed. Safe to call redundantly from any number of call
    /// sites; a refresh that races another is absorbed by the lock.
    pub(crate) async fn ensure_fresh(&self) -> Result<(), Error> {
        let mut guard = self.token().lock().await;
        let margin = self.config().token_refresh_margin;

        match guard.as_ref().map(|t| t.freshness(margin)) {
            Some(Freshness::Fresh) => Ok(()),
            Some(Freshness::NeedsRefresh) => {
                // Unwrap is safe under the match arm, but stay explicit.
                let Some(state) = guard.as_ref() else {
                    return Err(Error::NotAuthenticated);
                };
                match self.refresh(state.refresh_token()).await {
                    Ok(new_state) => {
                        *guard = Some(new_state);
                        Ok(())
                    }
                    Err(e) if e.is_auth_expired() => {
                        // Refresh token rejected server-side -- fall back
                        // to a full login with the stored credentials.
                        debug!(error = %e, "refresh rejected, re-authenticating");
                        *guard = Some(self.login().await?);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            Some(Freshness::NeedsLogin) | None => {
                *guard = Some(self.login().await?);
                Ok(())
            }
        }
    }

    /// The `Authorization: Bearer …` header value, refreshed first.
    ///
    /// Called immediately before every REST request and stream connect.
    pub async fn authorization_header(&self) -> Result<String, Error> {
        self.ensure_fresh().await?;
        let guard = self.token().lock().await;
        guard
            .as_ref()
            .map(TokenState::bearer)
            .ok_or(Error::NotAuthenticated)
    }

    async fn login(&self) -> Result<TokenState, Error> {
        let url = self.endpoint(AUTH_ENDPOINT)?;
        debug!(%url, "logging in");

        let credentials = self.credentials();
        let body = json!({
            "username": credentials.username,
            "password": credentials.password.expose_secret(),
        });

        let resp = self.http().post(url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Authentication {
                message: format!("login failed (HTTP {status}): {body}"),
            });
        }

        let grant: TokenResponse = resp.json().await?;
        debug!("login successful");
        Ok(TokenState::from_response(grant))
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenState, Error> {
        let url = self.endpoint(REFRESH_ENDPOINT)?;
        debug!(%url, "refreshing access token");

        let body = json!({ "refresh_token": refresh_token.expose_secret() });

        let resp = self.http().post(url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Authentication {
                message: format!("token refresh failed (HTTP {status}): {body}"),
            });
        }

        let grant: TokenResponse = resp.json().await?;
        debug!("token refresh successful");
        Ok(TokenState::from_response(grant))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn state(age: Duration, expires_in: u64, refresh_expires_in: u64) -> TokenState {
        TokenState {
            access_token: SecretString::from("access".to_owned()),
            refresh_token: SecretString::from("refresh".to_owned()),
            issued_at: Instant::now().checked_sub(age).unwrap(),
            expires_in: Duration::from_secs(expires_in),
            refresh_expires_in: Duration::from_secs(refresh_expires_in),
        }
    }

    const MARGIN: Duration = Duration::from_secs(2);

    #[test]
    fn fresh_token_needs_nothing() {
        let s = state(Duration::from_secs(10), 300, 1800);
        assert_eq!(s.freshness(MARGIN), Freshness::Fresh);
    }

    #[test]
    fn stale_access_token_needs_refresh() {
        let s = state(Duration::from_secs(299), 300, 1800);
        assert_eq!(s.freshness(MARGIN), Freshness::NeedsRefresh);
    }

    #[test]
    fn stale_refresh_token_needs_login() {
        let s = state(Duration::from_secs(1799), 300, 1800);
        assert_eq!(s.freshness(MARGIN), Freshness::NeedsLogin);
    }

    #[test]
    fn margin_larger_than_lifetime_saturates() {
        let s = state(Duration::from_secs(0), 1, 1);
        // Both lifetimes collapse to zero after the margin; any age
        // beyond zero forces a login rather than underflowing.
        assert_eq!(s.freshness(MARGIN), Freshness::NeedsLogin);
    }

    #[test]
    fn bearer_formats_header_value() {
        let s = state(Duration::from_secs(0), 300, 1800);
        assert_eq!(s.bearer(), "Bearer access");
    }
}
