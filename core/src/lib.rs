// Relay Core Library
// Channel-scoped speech and sound-effect delivery runtime

pub mod compiler;
pub mod delivery;
pub mod message;
pub mod names;
pub mod protocol;
pub mod providers;
pub mod queue;
pub mod registry;
pub mod tickets;
pub mod voices;

// Export core types
pub use compiler::{AudioSegment, EffectSegment, ParseError, SegmentCompiler, SpeechSegment};
pub use delivery::{
    AbortReason, DeliveryConfig, DeliveryEngine, DeliveryHandle, DeliveryOutcome, DeliveryState,
};
pub use message::{Message, Origin, SynthesisParams};
pub use protocol::{ControlMessage, Outbound};
pub use providers::{
    AlertSound, AlertSource, EffectLibrary, NoAlerts, PostProcessor, Providers, SpeechSynthesizer,
    SynthesisRequest,
};
pub use queue::{AdmittedBatch, PendingStatus, RequestQueue};
pub use registry::{
    ChannelRegistry, ConnectionHandle, ConnectionId, ConnectionInfo, DisconnectReason,
    LivenessConfig,
};
pub use tickets::TicketBook;
pub use voices::{SynthesisModel, Voice, VoiceCatalog};

use std::sync::Arc;

// Error types
use thiserror::Error;
use tracing::{debug, info, trace};

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Channel busy: {0}")]
    Busy(String),

    #[error("No connected client for channel: {0}")]
    NotFound(String),

    #[error("Client version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: String, got: String },

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Effect not found: {0}")]
    EffectNotFound(String),

    #[error("Post-processing error: {0}")]
    PostProcess(String),

    #[error("Playback confirmation timed out: {0}")]
    ConfirmTimeout(String),

    #[error("Batch cancelled for channel: {0}")]
    Cancelled(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
pub type Result<T> = std::result::Result<T, RelayError>;

/// Runtime-wide settings
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Fingerprint of the client asset; clients reporting another version are told to update
    pub asset_version: String,
    pub liveness: LivenessConfig,
    pub delivery: DeliveryConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            asset_version: env!("CARGO_PKG_VERSION").to_string(),
            liveness: LivenessConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

/// What the transport should do after an inbound control message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Continue,
    Disconnect,
}

/// Core runtime
#[derive(Clone)]
pub struct Relay {
    pub registry: ChannelRegistry,
    pub queue: RequestQueue,
    pub tickets: TicketBook,
    pub delivery: DeliveryEngine,
    pub catalog: Arc<VoiceCatalog>,
    pub providers: Providers,
}

impl Relay {
    pub fn new(config: RelayConfig, catalog: VoiceCatalog, providers: Providers) -> Result<Self> {
        config.liveness.validate()?;
        if catalog.voices().is_empty() {
            return Err(RelayError::Config("at least one voice must be configured".into()));
        }

        let catalog = Arc::new(catalog);
        let queue = RequestQueue::new();
        let tickets = TicketBook::new();
        let registry = ChannelRegistry::new(
            config.asset_version,
            config.liveness,
            queue.clone(),
            tickets.clone(),
        );
        let delivery = DeliveryEngine::new(
            registry.clone(),
            queue.clone(),
            tickets.clone(),
            Arc::clone(&catalog),
            providers.clone(),
            config.delivery,
        );

        info!(
            voices = catalog.voices().len(),
            effects = providers.effects.names().len(),
            "Relay runtime ready"
        );
        Ok(Self {
            registry,
            queue,
            tickets,
            delivery,
            catalog,
            providers,
        })
    }

    /// Compile, admit and start delivering a message
    pub fn submit(&self, message: Message) -> Result<DeliveryHandle> {
        self.delivery.submit(message)
    }

    /// Apply one inbound text frame from a registered connection
    pub fn handle_control(&self, handle: &ConnectionHandle, raw: &str) -> ControlOutcome {
        match ControlMessage::parse(raw) {
            Some(ControlMessage::Ping) => {
                trace!(target: "registry", channel = %handle.channel, client = %handle.display_name, "ping");
                self.registry.heartbeat(handle);
                ControlOutcome::Continue
            }
            Some(ControlMessage::Close) => {
                info!(target: "registry", channel = %handle.channel, client = %handle.display_name, "Client requested close");
                self.registry
                    .unregister(handle, DisconnectReason::ClientClose);
                ControlOutcome::Disconnect
            }
            Some(ControlMessage::Confirm(id)) => {
                if self.tickets.confirm(&handle.channel, &id) {
                    debug!(
                        target: "delivery",
                        channel = %handle.channel,
                        batch = %names::batch_name(&id),
                        "Confirmation received"
                    );
                } else {
                    debug!(target: "delivery", channel = %handle.channel, correlation_id = %id, "Confirmation without open ticket");
                }
                ControlOutcome::Continue
            }
            None => {
                debug!(target: "registry", channel = %handle.channel, message = %raw, "Unknown message from client");
                ControlOutcome::Continue
            }
        }
    }
}
