//! Per-channel single-flight admission
//!
//! At most one batch is pending per channel. A second submission is refused
//! with `Busy` rather than buffered.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::compiler::AudioSegment;
use crate::{RelayError, Result};

#[derive(Debug)]
struct PendingRequest {
    correlation_id: String,
    submitted_at: DateTime<Utc>,
    total: usize,
    cursor: usize,
    cancel: watch::Sender<bool>,
}

/// Read-only view of a pending batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStatus {
    pub channel: String,
    pub correlation_id: String,
    pub submitted_at: DateTime<Utc>,
    pub total: usize,
    pub cursor: usize,
}

/// Resolves once the owning batch has been cleared from the queue
#[derive(Debug, Clone)]
pub struct Cancellation(watch::Receiver<bool>);

impl Cancellation {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow() || self.0.has_changed().is_err()
    }

    pub async fn cancelled(&mut self) {
        while !*self.0.borrow_and_update() {
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }
}

/// A batch that won admission for its channel
#[derive(Debug)]
pub struct AdmittedBatch {
    pub channel: String,
    pub correlation_id: String,
    pub submitted_at: DateTime<Utc>,
    pub segments: Vec<AudioSegment>,
    pub cancellation: Cancellation,
}

#[derive(Clone, Default)]
pub struct RequestQueue {
    pending: Arc<DashMap<String, PendingRequest>>,
    last_id: Arc<AtomicI64>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a batch, or fail with `Busy` if the channel already has one
    pub fn admit(&self, channel: &str, segments: Vec<AudioSegment>) -> Result<AdmittedBatch> {
        let submitted_at = Utc::now();
        let now = submitted_at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| submitted_at.timestamp_micros() * 1_000);
        // Strictly increasing, so two batches never share an id
        let previous = self
            .last_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        let correlation_id = now.max(previous + 1).to_string();

        match self.pending.entry(channel.to_string()) {
            Entry::Occupied(existing) => {
                debug!(
                    target: "queue",
                    channel = %channel,
                    pending = %existing.get().correlation_id,
                    "Rejecting batch, channel busy"
                );
                Err(RelayError::Busy(channel.to_string()))
            }
            Entry::Vacant(slot) => {
                let (cancel, rx) = watch::channel(false);
                slot.insert(PendingRequest {
                    correlation_id: correlation_id.clone(),
                    submitted_at,
                    total: segments.len(),
                    cursor: 0,
                    cancel,
                });
                debug!(target: "queue", channel = %channel, correlation_id = %correlation_id, segments = segments.len(), "Batch admitted");
                Ok(AdmittedBatch {
                    channel: channel.to_string(),
                    correlation_id,
                    submitted_at,
                    segments,
                    cancellation: Cancellation(rx),
                })
            }
        }
    }

    /// Drop whatever is pending for the channel and signal its delivery task.
    /// Returns whether anything was pending.
    pub fn clear(&self, channel: &str) -> bool {
        match self.pending.remove(channel) {
            Some((_, request)) => {
                request.cancel.send_replace(true);
                info!(target: "queue", channel = %channel, correlation_id = %request.correlation_id, "Cleared pending batch");
                true
            }
            None => false,
        }
    }

    /// Remove the entry only if it still belongs to `correlation_id`
    pub fn finish(&self, channel: &str, correlation_id: &str) -> bool {
        self.pending
            .remove_if(channel, |_, p| p.correlation_id == correlation_id)
            .is_some()
    }

    pub fn advance(&self, channel: &str, correlation_id: &str, cursor: usize) {
        if let Some(mut entry) = self.pending.get_mut(channel) {
            if entry.correlation_id == correlation_id {
                entry.cursor = cursor;
            }
        }
    }

    pub fn is_pending(&self, channel: &str) -> bool {
        self.pending.contains_key(channel)
    }

    pub fn status(&self, channel: &str) -> Option<PendingStatus> {
        self.pending.get(channel).map(|p| PendingStatus {
            channel: channel.to_string(),
            correlation_id: p.correlation_id.clone(),
            submitted_at: p.submitted_at,
            total: p.total,
            cursor: p.cursor,
        })
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
