//! Docker container event source.
//!
//! Subscribing yields a bounded channel that first carries one
//! `InitialDetection` event per running container, then live
//! start/stop/die events. If the daemon connection drops, the source
//! reconnects after a delay and re-runs the initial scan, so late
//! subscribers and reconnects look the same to the consumer.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::models::{ContainerSummary, EventMessage};
use bollard::system::EventsOptions;
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;

/// Bound of the event channel between the source and the consumer.
const EVENT_BUFFER: usize = 100;

/// Delay before reconnecting after the Docker event stream dies.
const RECONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(2);

/// Container lifecycle events the sync engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Container was already running when the subscription started.
    InitialDetection,
    /// Container started.
    Start,
    /// Container stopped.
    Stop,
    /// Container died.
    Die,
}

impl EventType {
    /// Parse a Docker event action. Unknown actions are not events we
    /// subscribe to.
    fn from_action(action: &str) -> Option<Self> {
        match action {
            "start" => Some(EventType::Start),
            "stop" => Some(EventType::Stop),
            "die" => Some(EventType::Die),
            _ => None,
        }
    }

    /// True when this event marks the container as running.
    pub fn is_up(&self) -> bool {
        matches!(self, EventType::InitialDetection | EventType::Start)
    }
}

/// A container lifecycle event with the label set the translator needs.
#[derive(Debug, Clone)]
pub struct ContainerEvent {
    /// Container id; may be empty on malformed daemon events.
    pub id: String,
    /// Container name.
    pub name: String,
    /// Container creation instant.
    pub created: DateTime<Utc>,
    /// Container labels.
    pub labels: HashMap<String, String>,
    /// What happened.
    pub event_type: EventType,
}

/// Source of container lifecycle events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Subscribe to the event stream. The channel closes when `cancel`
    /// fires or the source shuts down.
    async fn subscribe(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ContainerEvent>, SyncError>;
}

/// Event source backed by the local Docker daemon.
#[derive(Debug, Default)]
pub struct DockerEventSource;

impl DockerEventSource {
    /// Create a source for the local daemon (unix socket or env-configured).
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventSource for DockerEventSource {
    async fn subscribe(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ContainerEvent>, SyncError> {
        // Connect and ping up front so a dead daemon is a startup failure
        // rather than a silently empty stream.
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        info!("connected to Docker daemon");

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(run_event_loop(docker, tx, cancel));
        Ok(rx)
    }
}

async fn run_event_loop(
    mut docker: Docker,
    tx: mpsc::Sender<ContainerEvent>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            info!("docker event source cancelled");
            return;
        }

        match stream_events(&docker, &tx, &cancel).await {
            StreamOutcome::Cancelled | StreamOutcome::ConsumerGone => return,
            StreamOutcome::Disconnected => {}
        }

        warn!("Docker event stream ended, reconnecting");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }

        // The old handle may hold a broken connection; rebuild it.
        match Docker::connect_with_local_defaults() {
            Ok(fresh) => docker = fresh,
            Err(err) => error!(error = %err, "failed to reconnect to Docker daemon"),
        }
    }
}

enum StreamOutcome {
    Cancelled,
    ConsumerGone,
    Disconnected,
}

/// One connected session: initial scan, then the live stream until it dies.
async fn stream_events(
    docker: &Docker,
    tx: &mpsc::Sender<ContainerEvent>,
    cancel: &CancellationToken,
) -> StreamOutcome {
    let since = Utc::now().timestamp();

    // Initial scan of running containers.
    let options = ListContainersOptions::<String> {
        all: false,
        ..Default::default()
    };
    let containers = match docker.list_containers(Some(options)).await {
        Ok(containers) => containers,
        Err(err) => {
            error!(error = %err, "failed to list running containers");
            return StreamOutcome::Disconnected;
        }
    };
    info!(count = containers.len(), "initial container scan complete");
    for summary in containers {
        let event = event_from_summary(summary);
        tokio::select! {
            _ = cancel.cancelled() => return StreamOutcome::Cancelled,
            sent = tx.send(event) => {
                if sent.is_err() {
                    return StreamOutcome::ConsumerGone;
                }
            }
        }
    }

    // Live events from the point the scan started.
    let options = EventsOptions::<String> {
        since: Some(since.to_string()),
        filters: [
            ("type".to_string(), vec!["container".to_string()]),
            (
                "event".to_string(),
                vec!["start".to_string(), "stop".to_string(), "die".to_string()],
            ),
        ]
        .into_iter()
        .collect(),
        ..Default::default()
    };
    let mut stream = docker.events(Some(options));
    debug!("listening for Docker container events");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamOutcome::Cancelled,
            message = stream.next() => match message {
                Some(Ok(message)) => {
                    let Some(event) = event_from_message(message) else {
                        continue;
                    };
                    if tx.send(event).await.is_err() {
                        return StreamOutcome::ConsumerGone;
                    }
                }
                Some(Err(err)) => {
                    error!(error = %err, "error on Docker event stream");
                    return StreamOutcome::Disconnected;
                }
                None => return StreamOutcome::Disconnected,
            },
        }
    }
}

fn event_from_summary(summary: ContainerSummary) -> ContainerEvent {
    let name = summary
        .names
        .as_ref()
        .and_then(|names| names.first())
        .map(|name| name.trim_start_matches('/').to_string())
        .unwrap_or_default();
    ContainerEvent {
        id: summary.id.unwrap_or_default(),
        name,
        created: summary
            .created
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_default(),
        labels: summary.labels.unwrap_or_default(),
        event_type: EventType::InitialDetection,
    }
}

fn event_from_message(message: EventMessage) -> Option<ContainerEvent> {
    let action = message.action.as_deref().unwrap_or_default();
    let Some(event_type) = EventType::from_action(action) else {
        warn!(action, "dropping Docker event with unsupported action");
        return None;
    };

    let actor = message.actor?;
    let attributes = actor.attributes.unwrap_or_default();
    let name = attributes.get("name").cloned().unwrap_or_default();
    let created = message
        .time_nano
        .map(DateTime::from_timestamp_nanos)
        .or_else(|| message.time.and_then(|secs| DateTime::from_timestamp(secs, 0)))
        .unwrap_or_default();

    Some(ContainerEvent {
        id: actor.id.unwrap_or_default(),
        name,
        // Event actor attributes carry the container's labels.
        labels: attributes,
        created,
        event_type,
    })
}
