//! Realtime event stream with auto-reconnect.
//!
//! Connects to the Homely WebSocket endpoint for one location and fans
//! decoded events out through a [`tokio::sync::broadcast`] channel. A
//! dropped connection is retried indefinitely with a fixed delay; a
//! fresh bearer header is fetched immediately before every connect
//! attempt so a reconnect never rides an expired token.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use homely_api::{ApiConfig, HomelyClient, StreamHandle};
//! use homely_api::auth::Credentials;
//! use tokio_util::sync::CancellationToken;
//!
//! let client = Arc::new(HomelyClient::new(
//!     Credentials::new("user@example.com", "secret"),
//!     ApiConfig::default(),
//! )?);
//! let cancel = CancellationToken::new();
//!
//! let handle = StreamHandle::connect(client, "48617520-…".into(), cancel.clone());
//! let mut rx = handle.subscribe();
//!
//! while let Ok(event) = rx.recv().await {
//!     println!("{event:?}");
//! }
//!
//! handle.shutdown();
//! ```

use std::sync::Arc;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::client::HomelyClient;
use crate::error::Error;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── Event types ──────────────────────────────────────────────────────

/// A decoded event from the Homely stream.
///
/// The wire shape is `{"type": …, "data": …}`. Types this client does
/// not recognize land in [`Unknown`](Self::Unknown) with their payload
/// intact -- the server grows new event types without notice.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Per-field device state delta.
    DeviceStateChanged(DeviceStateData),
    /// Site alarm-state transition.
    AlarmStateChanged(AlarmStateData),
    /// Anything else the server sends.
    Unknown { event_type: String, data: Value },
}

/// Payload of a `device-state-changed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStateData {
    pub device_id: String,
    #[serde(default)]
    pub gateway_id: Option<String>,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub root_location_id: Option<String>,
    pub changes: Vec<StateChange>,
}

/// One field-level change within a device delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    /// Feature block name, e.g. `"temperature"`.
    pub feature: String,
    /// Field name within the feature, e.g. `"temperature"`.
    pub state_name: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub last_updated: Option<String>,
}

/// Payload of an `alarm-state-changed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmStateData {
    #[serde(default)]
    pub location_id: Option<String>,
    /// New alarm state as the server spells it.
    pub state: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

// ── StreamHandle ─────────────────────────────────────────────────────

/// Handle to a running event stream for one location.
///
/// Drop all receivers and call [`shutdown`](Self::shutdown) to tear
/// down the background task.
pub struct StreamHandle {
    event_rx: broadcast::Receiver<Arc<StreamEvent>>,
    cancel: CancellationToken,
}

impl StreamHandle {
    /// Spawn the connect/read/reconnect loop for `location_id`.
    ///
    /// Returns immediately; the first connection attempt happens on the
    /// background task. Subscribe to start consuming events.
    pub fn connect(
        client: Arc<HomelyClient>,
        location_id: String,
        cancel: CancellationToken,
    ) -> Self {
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            ws_loop(client, location_id, event_tx, task_cancel).await;
        });

        Self { event_rx, cancel }
    }

    /// Get a new broadcast receiver for the event stream.
    ///
    /// Multiple consumers can subscribe concurrently. A consumer that
    /// falls behind receives [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StreamEvent>> {
        self.event_rx.resubscribe()
    }

    /// Signal the background task to shut down gracefully.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on failure, fixed delay → reconnect.
///
/// There is no backoff and no retry cap: the stream outlives any
/// outage and only the cancellation token stops it. A clean server
/// close reconnects immediately.
async fn ws_loop(
    client: Arc<HomelyClient>,
    location_id: String,
    event_tx: broadcast::Sender<Arc<StreamEvent>>,
    cancel: CancellationToken,
) {
    let delay = client.config().reconnect_delay;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = connect_and_read(&client, &location_id, &event_tx, &cancel) => {
                match result {
                    Ok(()) => {
                        tracing::info!("stream disconnected cleanly, reconnecting");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stream error, reconnecting after delay");

                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }

    tracing::debug!("stream loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish one WebSocket connection and read until it drops.
///
/// The bearer header is fetched fresh for every attempt; the server
/// also expects the target location as both a query parameter and a
/// `locationId` header on the upgrade request.
async fn connect_and_read(
    client: &HomelyClient,
    location_id: &str,
    event_tx: &broadcast::Sender<Arc<StreamEvent>>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let bearer = client.authorization_header().await?;

    let mut url: Url = client.config().ws_url.clone();
    url.set_query(Some(&format!("locationId={location_id}")));
    tracing::info!(url = %url, "connecting to event stream");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let request = ClientRequestBuilder::new(uri)
        .with_header("Authorization", bearer)
        .with_header("locationId", location_id);

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!("event stream connected");

    let (_write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        parse_and_broadcast(&text, event_tx);
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite answers pongs automatically
                        tracing::trace!("stream ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(
                                code = %cf.code,
                                reason = %cf.reason,
                                "stream close frame received"
                            );
                        } else {
                            tracing::info!("stream close frame received (no payload)");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    None => {
                        tracing::info!("stream ended without close frame");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

// ── Message parsing ──────────────────────────────────────────────────

/// Raw envelope for every stream message.
#[derive(Debug, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

/// Parse a text frame and broadcast the decoded event.
///
/// Malformed frames are logged and dropped -- nothing the server sends
/// may take down the read loop.
fn parse_and_broadcast(text: &str, event_tx: &broadcast::Sender<Arc<StreamEvent>>) {
    let envelope: WireEnvelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse stream envelope");
            return;
        }
    };

    let event = decode_event(envelope);

    // Send errors just mean no active subscribers right now
    let _ = event_tx.send(Arc::new(event));
}

/// Map a wire envelope onto a typed event.
///
/// A recognized type whose payload fails to decode is demoted to
/// [`StreamEvent::Unknown`] rather than dropped, keeping the raw data
/// available to observers.
fn decode_event(envelope: WireEnvelope) -> StreamEvent {
    let WireEnvelope { event_type, data } = envelope;

    match event_type.as_str() {
        "device-state-changed" => match serde_json::from_value(data.clone()) {
            Ok(decoded) => StreamEvent::DeviceStateChanged(decoded),
            Err(e) => {
                tracing::debug!(error = %e, %event_type, "undecodable payload for known type");
                StreamEvent::Unknown { event_type, data }
            }
        },
        "alarm-state-changed" => match serde_json::from_value(data.clone()) {
            Ok(decoded) => StreamEvent::AlarmStateChanged(decoded),
            Err(e) => {
                tracing::debug!(error = %e, %event_type, "undecodable payload for known type");
                StreamEvent::Unknown { event_type, data }
            }
        },
        _ => StreamEvent::Unknown { event_type, data },
    }
}

// ── Tests ────────────────────────────────────────────────────────────
