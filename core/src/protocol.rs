// Client <-> server control protocol
//
// Text frames carry control messages, binary frames carry audio. Binary is
// only ever sent right after a `start <id>`.

/// Message pushed to a connection's writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
    /// Transport-level keepalive (a WebSocket ping frame)
    Keepalive,
}

/// Inbound control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Ping,
    Close,
    Confirm(String),
}

impl ControlMessage {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw {
            "ping" => return Some(ControlMessage::Ping),
            "close" => return Some(ControlMessage::Close),
            _ => {}
        }
        let id = raw.strip_prefix("confirm ")?.trim();
        if id.is_empty() {
            None
        } else {
            Some(ControlMessage::Confirm(id.to_string()))
        }
    }
}

pub const RELOAD: &str = "reload";

pub fn start(correlation_id: &str) -> String {
    format!("start {correlation_id}")
}

pub fn update(version: &str) -> String {
    format!("update {version}")
}
