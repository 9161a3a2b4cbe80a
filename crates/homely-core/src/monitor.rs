// ── Location monitor ──
//
// Owns one SingleLocation on a single consumer task and drives it from
// the event stream. The aggregate has exactly one writer by
// construction: REST refreshes are routed through the same task as
// stream events, so no external synchronization is needed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use homely_api::stream::{StreamEvent, StreamHandle};
use homely_api::HomelyClient;

use crate::error::CoreError;
use crate::model::{AlarmState, Feature, SingleLocation};
use crate::reconcile::EventOutcome;

const UPDATE_CHANNEL_SIZE: usize = 256;
const COMMAND_CHANNEL_SIZE: usize = 16;

// ── StateUpdate ──────────────────────────────────────────────────────

/// Owned notification of one applied stream event, for subscribers
/// that live outside the consumer task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all_fields = "camelCase")]
pub enum StateUpdate {
    /// The site alarm state changed.
    Alarm {
        location_id: String,
        state: AlarmState,
        last_updated: Option<DateTime<Utc>>,
    },
    /// A device's states were patched; `changed` lists the feature
    /// slots touched, in application order.
    Device {
        device_id: String,
        device_name: String,
        changed: Vec<Feature>,
    },
}

enum Command {
    Refresh(oneshot::Sender<Result<(), CoreError>>),
}

// ── LocationMonitor ──────────────────────────────────────────────────

/// Live view of one location, kept in sync by the event stream.
///
/// Observers either subscribe to [`StateUpdate`] notices or watch the
/// snapshot channel for a current `Arc<SingleLocation>`.
#[derive(Debug)]
pub struct LocationMonitor {
    location_id: String,
    update_tx: broadcast::Sender<StateUpdate>,
    snapshot_rx: watch::Receiver<Arc<SingleLocation>>,
    command_tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LocationMonitor {
    /// Fetch the location, connect its event stream, and spawn the
    /// consumer loop.
    pub async fn start(
        client: Arc<HomelyClient>,
        location_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> Result<Self, CoreError> {
        let location_id = location_id.into();

        let home = client.get_home(&location_id).await?;
        let location = SingleLocation::from_response(home)?;
        info!(location = %location, "initial location fetch complete");

        // The stream task is tied to a child token; cancelling the
        // monitor tears it down too. The handle itself can drop -- the
        // consumer keeps the one receiver that matters.
        let stream = StreamHandle::connect(
            Arc::clone(&client),
            location_id.clone(),
            cancel.child_token(),
        );
        let events = stream.subscribe();

        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_SIZE);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(location.clone()));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);

        let task = tokio::spawn(consumer_loop(ConsumerTask {
            client,
            location_id: location_id.clone(),
            location,
            events,
            update_tx: update_tx.clone(),
            snapshot_tx,
            command_rx,
            cancel: cancel.clone(),
        }));

        Ok(Self {
            location_id,
            update_tx,
            snapshot_rx,
            command_tx,
            cancel,
            task,
        })
    }

    pub fn location_id(&self) -> &str {
        &self.location_id
    }

    /// Subscribe to per-event update notices.
    pub fn subscribe(&self) -> broadcast::Receiver<StateUpdate> {
        self.update_tx.subscribe()
    }

    /// The current aggregate snapshot (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<SingleLocation> {
        self.snapshot_rx.borrow().clone()
    }

    /// Watch snapshot replacements.
    pub fn watch(&self) -> watch::Receiver<Arc<SingleLocation>> {
        self.snapshot_rx.clone()
    }

    /// Rebuild the aggregate from a fresh REST fetch.
    ///
    /// The fetch and swap run on the consumer task, preserving
    /// single-writer ownership; prior `Device` instances are dropped,
    /// not merged.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Refresh(reply_tx))
            .await
            .map_err(|_| CoreError::Internal("monitor stopped".into()))?;
        reply_rx
            .await
            .map_err(|_| CoreError::Internal("monitor stopped".into()))?
    }

    /// Stop the consumer loop and the stream task, waiting for both.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "consumer task did not shut down cleanly");
        }
    }
}

// ── Consumer task ────────────────────────────────────────────────────

struct ConsumerTask {
    client: Arc<HomelyClient>,
    location_id: String,
    location: SingleLocation,
    events: broadcast::Receiver<Arc<StreamEvent>>,
    update_tx: broadcast::Sender<StateUpdate>,
    snapshot_tx: watch::Sender<Arc<SingleLocation>>,
    command_rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
}

/// One event at a time: reconcile, publish, repeat.
async fn consumer_loop(mut task: ConsumerTask) {
    loop {
        tokio::select! {
            biased;
            _ = task.cancel.cancelled() => break,
            command = task.command_rx.recv() => {
                match command {
                    Some(Command::Refresh(reply)) => {
                        let result = refresh(&mut task).await;
                        let _ = reply.send(result);
                    }
                    // Monitor handle dropped -- nothing left to serve.
                    None => break,
                }
            }
            event = task.events.recv() => {
                match event {
                    Ok(event) => apply_event(&mut task, event.as_ref()),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "event consumer lagged; state is stale until the next refresh");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    debug!("location consumer loop exiting");
}

fn apply_event(task: &mut ConsumerTask, event: &StreamEvent) {
    let update = match task.location.handle_event(event) {
        Some(EventOutcome::AlarmChanged { location }) => StateUpdate::Alarm {
            location_id: location.location_id.clone(),
            state: location.alarm_state.clone(),
            last_updated: location.alarm_state_last_updated,
        },
        Some(EventOutcome::DeviceChanged { device, changed }) => StateUpdate::Device {
            device_id: device.id.clone(),
            device_name: device.name.clone(),
            changed,
        },
        None => return,
    };

    task.snapshot_tx.send_replace(Arc::new(task.location.clone()));
    let _ = task.update_tx.send(update);
}

async fn refresh(task: &mut ConsumerTask) -> Result<(), CoreError> {
    let home = task.client.get_home(&task.location_id).await?;
    let location = SingleLocation::from_response(home)?;
    info!(location = %location, "location refreshed");

    task.location = location;
    task.snapshot_tx.send_replace(Arc::new(task.location.clone()));
    Ok(())
}
