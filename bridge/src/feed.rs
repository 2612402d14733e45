//! Pally.gg tip feed
//!
//! Holds one firehose connection per configured `{name, key}` and turns
//! `campaigntip.notify` events into alert-prefixed announcements on the
//! channel named after the key.
//!
//! Env overrides:
//! - PALLY_KEYS: JSON `[{"name": "...", "key": "..."}]`
//! - PALLY_VOICES: JSON `[{"channel": "...", "voice": "..."}]`
//! - PALLY_URL

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use relay_core::{DeliveryHandle, Message, Origin, Relay, RelayError, SynthesisParams};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, trace, warn};

use crate::config::json_env;

const TIP_EVENT: &str = "campaigntip.notify";

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct FeedKey {
    pub name: String,
    pub key: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct FeedVoice {
    pub channel: String,
    pub voice: String,
}

#[derive(Clone, Debug)]
pub struct FeedConfig {
    pub url: String,
    pub keys: Vec<FeedKey>,
    pub voices: Vec<FeedVoice>,
    pub keepalive: Duration,
    pub retry_delay: Duration,
    pub max_wait: Duration,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("PALLY_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "wss://events.pally.gg".to_string()),
            keys: json_env("PALLY_KEYS"),
            voices: json_env("PALLY_VOICES"),
            keepalive: Duration::from_secs(60),
            retry_delay: Duration::from_secs(1),
            max_wait: Duration::from_secs(30),
            backoff_min: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl FeedConfig {
    /// Entries with a blank name or key are skipped
    pub fn usable_keys(&self) -> Vec<FeedKey> {
        self.keys
            .iter()
            .filter(|k| {
                let usable = !k.name.trim().is_empty() && !k.key.trim().is_empty();
                if !usable {
                    warn!(target: "feed", name = %k.name, "Skipping Pally entry without name or key");
                }
                usable
            })
            .cloned()
            .collect()
    }

    /// Firehose URL for one key
    pub fn endpoint(&self, key: &str) -> String {
        format!(
            "{}?auth={}&channel=firehose",
            self.url,
            urlencoding::encode(key)
        )
    }

    pub fn voice_for(&self, channel: &str) -> Option<&str> {
        self.voices
            .iter()
            .find(|v| v.channel.eq_ignore_ascii_case(channel))
            .map(|v| v.voice.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct FeedEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CampaignTip {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub gross_amount_in_cents: u64,
    #[serde(default)]
    pub message: String,
}

/// Extract a tip from a feed frame. Other event types yield `None`.
pub fn parse_tip(raw: &str) -> serde_json::Result<Option<CampaignTip>> {
    let event: FeedEvent = serde_json::from_str(raw)?;
    if event.kind != TIP_EVENT {
        return Ok(None);
    }
    let tip = event
        .payload
        .get("campaignTip")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    serde_json::from_value(tip).map(Some)
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("{n} {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

/// `150` -> `"1 dollar and 50 cents"`, `200` -> `"2 dollars"`, `7` -> `"7 cents"`
pub fn format_amount(cents: u64) -> String {
    let dollars = cents / 100;
    let rest = cents % 100;
    match (dollars, rest) {
        (0, c) => plural(c, "cent"),
        (d, 0) => plural(d, "dollar"),
        (d, c) => format!("{} and {}", plural(d, "dollar"), plural(c, "cent")),
    }
}

pub fn announcement(tip: &CampaignTip) -> String {
    let user = match tip.display_name.trim() {
        "" => "Anonymous",
        name => name,
    };
    let mut text = format!(
        "{user} just tipped {} to the mods!",
        format_amount(tip.gross_amount_in_cents)
    );
    let message = tip.message.trim();
    if !message.is_empty() {
        text.push(' ');
        text.push_str(message);
    }
    text
}

/// Submit, retrying while the channel is busy or has no client, until `max_wait` runs out
pub async fn submit_with_retry(
    relay: &Relay,
    message: Message,
    retry_delay: Duration,
    max_wait: Duration,
) -> relay_core::Result<DeliveryHandle> {
    let deadline = Instant::now() + max_wait;
    loop {
        match relay.submit(message.clone()) {
            Ok(handle) => return Ok(handle),
            Err(e @ (RelayError::Busy(_) | RelayError::NotFound(_))) => {
                if Instant::now() + retry_delay > deadline {
                    return Err(e);
                }
                trace!(target: "feed", channel = %message.channel, error = %e, "Retrying tip announcement");
                sleep(retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Clone)]
pub struct FeedAdapter {
    relay: Relay,
    cfg: Arc<FeedConfig>,
}

impl FeedAdapter {
    pub fn new(relay: Relay, cfg: FeedConfig) -> Self {
        Self {
            relay,
            cfg: Arc::new(cfg),
        }
    }

    /// One listener task per usable key
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        let keys = self.cfg.usable_keys();
        if keys.is_empty() {
            info!(target: "feed", "No Pally keys configured");
        }
        keys.into_iter()
            .map(|key| {
                let adapter = self.clone();
                tokio::spawn(async move { adapter.listen(key).await })
            })
            .collect()
    }

    pub fn tip_message(&self, channel: &str, tip: &CampaignTip) -> Message {
        Message::new(channel, announcement(tip))
            .with_voice(self.cfg.voice_for(channel).unwrap_or_default())
            .with_params(SynthesisParams::default())
            .with_alert(true)
            .with_origin(Origin::Feed)
    }

    async fn listen(self, key: FeedKey) {
        let channel = key.name.to_lowercase();
        let mut backoff = self.cfg.backoff_min;
        loop {
            match self.connect_once(&channel, &key.key).await {
                Ok(received) => {
                    warn!(target: "feed", channel = %channel, "Feed connection closed");
                    if received {
                        backoff = self.cfg.backoff_min;
                    }
                }
                Err(e) => {
                    warn!(target: "feed", channel = %channel, error = %e, "Feed connection failed");
                }
            }
            debug!(target: "feed", channel = %channel, delay = ?backoff, "Reconnecting to feed");
            sleep(backoff).await;
            backoff = (backoff * 2).min(self.cfg.backoff_max);
        }
    }

    /// Returns whether any frame arrived before the connection ended
    async fn connect_once(
        &self,
        channel: &str,
        key: &str,
    ) -> Result<bool, tokio_tungstenite::tungstenite::Error> {
        let url = self.cfg.endpoint(key);
        let (socket, _) = connect_async(url.as_str()).await?;
        info!(target: "feed", channel = %channel, "Connected to Pally");

        let (mut sink, mut stream) = socket.split();
        let mut keepalive = interval_at(Instant::now() + self.cfg.keepalive, self.cfg.keepalive);
        let mut received = false;
        loop {
            tokio::select! {
                _ = keepalive.tick() => {
                    sink.send(WsMessage::Text("ping".into())).await?;
                }
                inbound = stream.next() => match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        received = true;
                        self.on_text(channel, &text);
                    }
                    Some(Ok(WsMessage::Close(_))) | None => return Ok(received),
                    Some(Ok(_)) => received = true,
                    Some(Err(e)) => return Err(e),
                }
            }
        }
    }

    fn on_text(&self, channel: &str, raw: &str) {
        if raw.trim() == "pong" {
            trace!(target: "feed", channel = %channel, "pong");
            return;
        }
        let tip = match parse_tip(raw) {
            Ok(Some(tip)) => tip,
            Ok(None) => {
                debug!(target: "feed", channel = %channel, "Ignoring feed event");
                return;
            }
            Err(e) => {
                warn!(target: "feed", channel = %channel, error = %e, "Unreadable feed event");
                return;
            }
        };

        info!(
            target: "feed",
            channel = %channel,
            user = %tip.display_name,
            cents = tip.gross_amount_in_cents,
            "Tip received"
        );
        let message = self.tip_message(channel, &tip);
        let relay = self.relay.clone();
        let cfg = Arc::clone(&self.cfg);
        let channel = channel.to_string();
        tokio::spawn(async move {
            match submit_with_retry(&relay, message, cfg.retry_delay, cfg.max_wait).await {
                Ok(handle) => {
                    debug!(target: "feed", channel = %channel, batch = %handle.batch_name, "Tip announcement queued");
                    let outcome = handle.finished().await;
                    debug!(target: "feed", channel = %channel, outcome = ?outcome, "Tip announcement finished");
                }
                Err(e) => {
                    warn!(target: "feed", channel = %channel, error = %e, "Dropping tip announcement");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_read_naturally() {
        assert_eq!(format_amount(0), "0 cents");
        assert_eq!(format_amount(1), "1 cent");
        assert_eq!(format_amount(5), "5 cents");
        assert_eq!(format_amount(100), "1 dollar");
        assert_eq!(format_amount(150), "1 dollar and 50 cents");
        assert_eq!(format_amount(200), "2 dollars");
        assert_eq!(format_amount(201), "2 dollars and 1 cent");
    }

    #[test]
    fn announcement_includes_message_when_present() {
        let tip = CampaignTip {
            display_name: "Jo".into(),
            gross_amount_in_cents: 500,
            message: "keep it up".into(),
        };
        assert_eq!(announcement(&tip), "Jo just tipped 5 dollars to the mods! keep it up");

        let anon = CampaignTip {
            gross_amount_in_cents: 25,
            ..Default::default()
        };
        assert_eq!(announcement(&anon), "Anonymous just tipped 25 cents to the mods!");
    }

    #[test]
    fn only_tip_events_are_parsed() {
        let raw = r#"{"type":"campaigntip.notify","payload":{"campaignTip":{"displayName":"Sam","grossAmountInCents":150,"message":"hi"}}}"#;
        let tip = parse_tip(raw).unwrap().unwrap();
        assert_eq!(tip.display_name, "Sam");
        assert_eq!(tip.gross_amount_in_cents, 150);

        assert!(parse_tip(r#"{"type":"echo","payload":{}}"#).unwrap().is_none());
        assert!(parse_tip("not json").is_err());
    }

    #[test]
    fn blank_entries_are_skipped_and_keys_encoded() {
        let cfg = FeedConfig {
            url: "wss://events.example".into(),
            keys: vec![
                FeedKey {
                    name: "streamer".into(),
                    key: "a+b/c=".into(),
                },
                FeedKey {
                    name: "".into(),
                    key: "orphan".into(),
                },
                FeedKey {
                    name: "nokey".into(),
                    key: " ".into(),
                },
            ],
            ..FeedConfig::default()
        };
        let keys = cfg.usable_keys();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].name, "streamer");
        assert_eq!(
            cfg.endpoint(&keys[0].key),
            "wss://events.example?auth=a%2Bb%2Fc%3D&channel=firehose"
        );
    }

    #[test]
    fn voice_lookup_ignores_case() {
        let cfg = FeedConfig {
            voices: vec![FeedVoice {
                channel: "Streamer".into(),
                voice: "bob".into(),
            }],
            ..FeedConfig::default()
        };
        assert_eq!(cfg.voice_for("streamer"), Some("bob"));
        assert_eq!(cfg.voice_for("other"), None);
    }
}
