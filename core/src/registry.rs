//! Channel registry
//!
//! Owns every live client connection and its channel binding. A connection is
//! represented by the sending half of its writer queue; the transport layer
//! drains the other half into the socket.
//!
//! Each registered connection gets a liveness task that expects a heartbeat
//! (`ping`) before a deadline and sends transport keepalives on an interval.
//! Removing a connection for any reason cancels the channel's pending batch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::names;
use crate::protocol::{self, Outbound};
use crate::queue::RequestQueue;
use crate::tickets::TicketBook;
use crate::{RelayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub channel: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Client sent `close`
    ClientClose,
    /// Socket closed or errored on read
    Disconnected,
    LivenessTimeout,
    WriteFailed,
}

#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// How often clients are expected to ping
    pub expected_interval: Duration,
    /// Allowed silence after a ping; must exceed `expected_interval`
    pub deadline: Duration,
    /// Allowed silence before the first ping
    pub initial_deadline: Duration,
    /// Transport keepalive cadence
    pub keepalive_interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            expected_interval: Duration::from_secs(30),
            deadline: Duration::from_secs(60),
            initial_deadline: Duration::from_secs(120),
            keepalive_interval: Duration::from_secs(30),
        }
    }
}

impl LivenessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.deadline <= self.expected_interval {
            return Err(RelayError::Config(format!(
                "liveness deadline {:?} must exceed ping interval {:?}",
                self.deadline, self.expected_interval
            )));
        }
        if self.keepalive_interval.is_zero() {
            return Err(RelayError::Config("keepalive interval must be non-zero".into()));
        }
        Ok(())
    }
}

struct Connection {
    handle: ConnectionHandle,
    sender: mpsc::Sender<Outbound>,
    heartbeat: watch::Sender<()>,
    connected_at: DateTime<Utc>,
}

/// Snapshot of a registered connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub handle: ConnectionHandle,
    pub connected_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ChannelRegistry {
    connections: Arc<DashMap<ConnectionId, Connection>>,
    next_id: Arc<AtomicU64>,
    asset_version: Arc<str>,
    liveness: LivenessConfig,
    queue: RequestQueue,
    tickets: TicketBook,
}

impl ChannelRegistry {
    pub fn new(
        asset_version: impl Into<String>,
        liveness: LivenessConfig,
        queue: RequestQueue,
        tickets: TicketBook,
    ) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            asset_version: Arc::from(asset_version.into()),
            liveness,
            queue,
            tickets,
        }
    }

    pub fn asset_version(&self) -> &str {
        &self.asset_version
    }

    /// Bind a connection to `channel`.
    ///
    /// When `client_version` differs from the current asset version the
    /// client is told to `update <version>`, the sender is dropped, and
    /// `VersionMismatch` is returned.
    pub fn register(
        &self,
        channel: &str,
        client_version: Option<&str>,
        sender: mpsc::Sender<Outbound>,
    ) -> Result<ConnectionHandle> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let display_name = names::connection_name(id.as_u64());
        let channel = channel.to_lowercase();

        if client_version != Some(&*self.asset_version) {
            info!(
                target: "registry",
                channel = %channel,
                client = %display_name,
                version = ?client_version,
                current = %self.asset_version,
                "Client connected with outdated version"
            );
            if sender
                .try_send(Outbound::Text(protocol::update(&self.asset_version)))
                .is_err()
            {
                warn!(target: "registry", channel = %channel, client = %display_name, "Could not send update notice");
            }
            return Err(RelayError::VersionMismatch {
                expected: self.asset_version.to_string(),
                got: client_version.unwrap_or_default().to_string(),
            });
        }

        let handle = ConnectionHandle {
            id,
            channel,
            display_name,
        };
        let (heartbeat, beats) = watch::channel(());
        self.connections.insert(
            id,
            Connection {
                handle: handle.clone(),
                sender: sender.clone(),
                heartbeat,
                connected_at: Utc::now(),
            },
        );
        info!(target: "registry", channel = %handle.channel, client = %handle.display_name, id = %id, "Client connected");

        tokio::spawn(watch_liveness(self.clone(), handle.clone(), beats, sender));
        Ok(handle)
    }

    /// Remove a connection. Safe to call repeatedly; only the first call has
    /// an effect and returns `true`.
    pub fn unregister(&self, handle: &ConnectionHandle, reason: DisconnectReason) -> bool {
        let Some((_, conn)) = self.connections.remove(&handle.id) else {
            return false;
        };
        let lifetime = Utc::now() - conn.connected_at;
        info!(
            target: "registry",
            channel = %handle.channel,
            client = %handle.display_name,
            reason = ?reason,
            connected_secs = lifetime.num_seconds(),
            "Client disconnected"
        );
        drop(conn);

        let cleared = self.queue.clear(&handle.channel);
        let released = self.tickets.release_channel(&handle.channel);
        if cleared || released > 0 {
            info!(target: "registry", channel = %handle.channel, tickets = released, "Cancelled outstanding batch");
        }
        true
    }

    /// Record an inbound liveness signal
    pub fn heartbeat(&self, handle: &ConnectionHandle) -> bool {
        match self.connections.get(&handle.id) {
            Some(conn) => {
                conn.heartbeat.send_replace(());
                true
            }
            None => false,
        }
    }

    /// Send to every connection bound to `channel`. A connection whose writer
    /// is gone is unregistered. Returns the number of connections reached.
    pub async fn send(&self, channel: &str, payload: Outbound) -> Result<usize> {
        let targets: Vec<(ConnectionHandle, mpsc::Sender<Outbound>)> = self
            .connections
            .iter()
            .filter(|c| c.handle.channel == channel)
            .map(|c| (c.handle.clone(), c.sender.clone()))
            .collect();
        if targets.is_empty() {
            return Err(RelayError::NotFound(channel.to_string()));
        }

        let mut delivered = 0;
        for (handle, sender) in targets {
            match sender.send(payload.clone()).await {
                Ok(()) => delivered += 1,
                Err(_) => {
                    warn!(target: "registry", channel = %channel, client = %handle.display_name, "Write failed, dropping connection");
                    self.unregister(&handle, DisconnectReason::WriteFailed);
                }
            }
        }
        if delivered == 0 {
            return Err(RelayError::Transport(format!(
                "no connection accepted the write for {channel}"
            )));
        }
        Ok(delivered)
    }

    pub fn has_client(&self, channel: &str) -> bool {
        self.connections.iter().any(|c| c.handle.channel == channel)
    }

    pub fn clients(&self, channel: &str) -> Vec<ConnectionInfo> {
        let mut list: Vec<ConnectionInfo> = self
            .connections
            .iter()
            .filter(|c| c.handle.channel == channel)
            .map(|c| ConnectionInfo {
                handle: c.handle.clone(),
                connected_at: c.connected_at,
            })
            .collect();
        list.sort_by_key(|c| c.handle.id);
        list
    }

    pub fn channels(&self) -> Vec<String> {
        let mut list: Vec<String> = self
            .connections
            .iter()
            .map(|c| c.handle.channel.clone())
            .collect();
        list.sort();
        list.dedup();
        list
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

async fn watch_liveness(
    registry: ChannelRegistry,
    handle: ConnectionHandle,
    mut beats: watch::Receiver<()>,
    outbound: mpsc::Sender<Outbound>,
) {
    let cfg = registry.liveness.clone();
    let deadline = tokio::time::sleep(cfg.initial_deadline);
    tokio::pin!(deadline);
    let mut keepalive = tokio::time::interval_at(
        Instant::now() + cfg.keepalive_interval,
        cfg.keepalive_interval,
    );

    loop {
        tokio::select! {
            changed = beats.changed() => {
                if changed.is_err() {
                    // connection was unregistered elsewhere
                    return;
                }
                debug!(target: "registry", channel = %handle.channel, client = %handle.display_name, "Heartbeat");
                deadline.as_mut().reset(Instant::now() + cfg.deadline);
            }
            _ = &mut deadline => {
                info!(target: "registry", channel = %handle.channel, client = %handle.display_name, "Ping not received in time, closing connection");
                registry.unregister(&handle, DisconnectReason::LivenessTimeout);
                return;
            }
            _ = keepalive.tick() => {
                match outbound.try_send(Outbound::Keepalive) {
                    Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        registry.unregister(&handle, DisconnectReason::WriteFailed);
                        return;
                    }
                }
            }
        }
    }
}
