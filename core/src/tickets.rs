// Playback confirmation tickets keyed by (channel, correlation id)
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;

type TicketKey = (String, String);

/// Open ticket awaiting a `confirm <id>` from the client
#[derive(Debug)]
pub struct Ticket {
    pub channel: String,
    pub correlation_id: String,
    receiver: oneshot::Receiver<()>,
}

impl Ticket {
    /// `true` when confirmed, `false` when the ticket was released unconfirmed
    pub async fn confirmed(&mut self) -> bool {
        (&mut self.receiver).await.is_ok()
    }
}

#[derive(Clone, Default)]
pub struct TicketBook {
    open: Arc<DashMap<TicketKey, oneshot::Sender<()>>>,
}

impl TicketBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a ticket. Any older ticket under the same key is released.
    pub fn open(&self, channel: &str, correlation_id: &str) -> Ticket {
        let (tx, rx) = oneshot::channel();
        self.open
            .insert((channel.to_string(), correlation_id.to_string()), tx);
        Ticket {
            channel: channel.to_string(),
            correlation_id: correlation_id.to_string(),
            receiver: rx,
        }
    }

    /// Clear the matching ticket. Returns `false` if none was open.
    pub fn confirm(&self, channel: &str, correlation_id: &str) -> bool {
        match self
            .open
            .remove(&(channel.to_string(), correlation_id.to_string()))
        {
            Some((_, tx)) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Clear the matching ticket without confirming it
    pub fn expire(&self, channel: &str, correlation_id: &str) -> bool {
        self.open
            .remove(&(channel.to_string(), correlation_id.to_string()))
            .is_some()
    }

    /// Drop every ticket of the channel, returning how many were open
    pub fn release_channel(&self, channel: &str) -> usize {
        let before = self.open.len();
        self.open.retain(|(c, _), _| c != channel);
        before.saturating_sub(self.open.len())
    }

    pub fn is_open(&self, channel: &str, correlation_id: &str) -> bool {
        self.open
            .contains_key(&(channel.to_string(), correlation_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn confirm_clears_once() {
        let book = TicketBook::new();
        let mut ticket = book.open("chan", "T1");
        assert!(book.confirm("chan", "T1"));
        assert!(!book.confirm("chan", "T1"));
        assert!(ticket.confirmed().await);
        assert!(book.is_empty());
    }

    #[tokio::test]
    async fn release_resolves_unconfirmed() {
        let book = TicketBook::new();
        let mut ticket = book.open("chan", "T1");
        let _other = book.open("other", "T1");
        assert_eq!(book.release_channel("chan"), 1);
        assert!(!ticket.confirmed().await);
        assert!(book.is_open("other", "T1"));
    }
}
