//! Delivery state machine
//!
//! One task per admitted batch:
//!
//! ```text
//! Generating -> (alert pre-roll) -> [Sending -> AwaitingConfirm]* -> Completed
//!                                                                 \-> Aborted
//! ```
//!
//! Audio for every segment is generated before the first one is sent, so a
//! synthesis or effect failure never leaves a batch half played. Each segment
//! is announced with `start <id>`, sent as binary after a short grace period,
//! and then held until the client confirms it or the confirm timeout fires.
//! A timeout means the client is out of sync: the batch is dropped and the
//! client is told to `reload`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::compiler::{AudioSegment, ParseError, SegmentCompiler, SpeechSegment};
use crate::message::{Message, SynthesisParams};
use crate::names;
use crate::protocol::{self, Outbound};
use crate::providers::Providers;
use crate::queue::{AdmittedBatch, RequestQueue};
use crate::registry::ChannelRegistry;
use crate::tickets::TicketBook;
use crate::voices::VoiceCatalog;
use crate::{RelayError, Result};

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Pause between `start <id>` and the binary payload
    pub start_grace: Duration,
    pub confirm_timeout: Duration,
    /// Used when an alert sound's length cannot be probed
    pub alert_fallback: Duration,
    pub output_format: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            start_grace: Duration::from_millis(50),
            confirm_timeout: Duration::from_secs(120),
            alert_fallback: Duration::from_secs(5),
            output_format: "mp3_44100_128".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Generating,
    Sending,
    AwaitingConfirm,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    Generation(String),
    ConfirmTimeout,
    Cancelled,
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Completed { segments: usize },
    Aborted { reason: AbortReason, delivered: usize },
}

impl DeliveryOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, DeliveryOutcome::Completed { .. })
    }
}

/// Handle returned for a submitted batch
pub struct DeliveryHandle {
    pub channel: String,
    pub correlation_id: String,
    pub batch_name: String,
    pub segments: usize,
    generated: Option<oneshot::Receiver<Result<usize>>>,
    task: JoinHandle<DeliveryOutcome>,
}

impl DeliveryHandle {
    /// Wait until every segment has audio. Errors here mean nothing was played.
    pub async fn generated(&mut self) -> Result<usize> {
        let Some(rx) = self.generated.take() else {
            return Ok(self.segments);
        };
        rx.await
            .unwrap_or_else(|_| Err(RelayError::Cancelled(self.channel.clone())))
    }

    pub async fn finished(self) -> DeliveryOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => DeliveryOutcome::Aborted {
                reason: AbortReason::Transport(e.to_string()),
                delivered: 0,
            },
        }
    }
}

/// Releases the batch's queue entry and ticket however `run` exits, unwinding included
struct BatchGuard {
    queue: RequestQueue,
    tickets: TicketBook,
    channel: String,
    correlation_id: String,
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if self.queue.finish(&self.channel, &self.correlation_id) {
            warn!(target: "delivery", channel = %self.channel, correlation_id = %self.correlation_id, "Batch task ended without finishing; released");
        }
        self.tickets.expire(&self.channel, &self.correlation_id);
    }
}

#[derive(Clone)]
pub struct DeliveryEngine {
    registry: ChannelRegistry,
    queue: RequestQueue,
    tickets: TicketBook,
    catalog: Arc<VoiceCatalog>,
    providers: Providers,
    config: DeliveryConfig,
}

impl DeliveryEngine {
    pub fn new(
        registry: ChannelRegistry,
        queue: RequestQueue,
        tickets: TicketBook,
        catalog: Arc<VoiceCatalog>,
        providers: Providers,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            registry,
            queue,
            tickets,
            catalog,
            providers,
            config,
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Compile and admit a message, then spawn its delivery task.
    ///
    /// Fails synchronously with `Busy`, `NotFound` or `Parse`.
    pub fn submit(&self, message: Message) -> Result<DeliveryHandle> {
        let channel = message.channel.clone();
        if self.queue.is_pending(&channel) {
            info!(target: "delivery", channel = %channel, "Last audio is still playing");
            return Err(RelayError::Busy(channel));
        }
        if !self.registry.has_client(&channel) {
            return Err(RelayError::NotFound(channel));
        }

        let default_voice = self
            .catalog
            .resolve_or_default(message.default_voice.as_deref())
            .ok_or(ParseError::NoVoices)?;
        let segments = SegmentCompiler::new(&self.catalog, self.providers.effects.as_ref())
            .compile(&message.text, &default_voice)?;

        let batch = self.queue.admit(&channel, segments)?;
        let correlation_id = batch.correlation_id.clone();
        let batch_name = names::batch_name(&correlation_id);
        let count = batch.segments.len();
        info!(
            target: "delivery",
            channel = %channel,
            batch = %batch_name,
            correlation_id = %correlation_id,
            origin = ?message.origin,
            segments = count,
            alert = message.alert,
            "Batch accepted"
        );

        let (generated_tx, generated_rx) = oneshot::channel();
        let engine = self.clone();
        let task = tokio::spawn(async move { engine.run(batch, message, generated_tx).await });

        Ok(DeliveryHandle {
            channel,
            correlation_id,
            batch_name,
            segments: count,
            generated: Some(generated_rx),
            task,
        })
    }

    async fn run(
        self,
        mut batch: AdmittedBatch,
        message: Message,
        generated_tx: oneshot::Sender<Result<usize>>,
    ) -> DeliveryOutcome {
        let name = names::batch_name(&batch.correlation_id);
        let _guard = BatchGuard {
            queue: self.queue.clone(),
            tickets: self.tickets.clone(),
            channel: batch.channel.clone(),
            correlation_id: batch.correlation_id.clone(),
        };
        self.transition(&batch, &name, DeliveryState::Generating);

        let audio = match self.generate(&batch, &message.params).await {
            Ok(audio) => {
                let _ = generated_tx.send(Ok(audio.len()));
                audio
            }
            Err(e) => {
                error!(target: "delivery", channel = %batch.channel, batch = %name, error = %e, "Generation failed, dropping batch");
                let reason = match &e {
                    RelayError::Cancelled(_) => AbortReason::Cancelled,
                    other => AbortReason::Generation(other.to_string()),
                };
                let outcome = self.abort(&batch, &name, reason, 0).await;
                let _ = generated_tx.send(Err(e));
                return outcome;
            }
        };

        if message.alert {
            if let Err(reason) = self.play_alert(&mut batch, &name).await {
                return self.abort(&batch, &name, reason, 0).await;
            }
        }

        let total = audio.len();
        for (index, data) in audio.into_iter().enumerate() {
            if batch.cancellation.is_cancelled() {
                return self.abort(&batch, &name, AbortReason::Cancelled, index).await;
            }
            self.queue.advance(&batch.channel, &batch.correlation_id, index);
            if let Err(reason) = self.deliver_segment(&mut batch, &name, index, data).await {
                return self.abort(&batch, &name, reason, index).await;
            }
        }

        self.queue.finish(&batch.channel, &batch.correlation_id);
        self.tickets.expire(&batch.channel, &batch.correlation_id);
        self.transition(&batch, &name, DeliveryState::Completed);
        info!(target: "delivery", channel = %batch.channel, batch = %name, segments = total, "Batch completed");
        DeliveryOutcome::Completed { segments: total }
    }

    async fn generate(&self, batch: &AdmittedBatch, params: &SynthesisParams) -> Result<Vec<Vec<u8>>> {
        let mut audio = Vec::with_capacity(batch.segments.len());
        for segment in &batch.segments {
            if batch.cancellation.is_cancelled() {
                return Err(RelayError::Cancelled(batch.channel.clone()));
            }
            let data = match segment {
                AudioSegment::Effect(effect) => self.providers.effects.load(&effect.effect).await?,
                AudioSegment::Speech(speech) => {
                    self.synthesize(&batch.channel, speech, params).await?
                }
            };
            if data.is_empty() {
                return Err(RelayError::Synthesis(format!(
                    "no audio produced for {}",
                    segment.label()
                )));
            }
            debug!(target: "delivery", channel = %batch.channel, segment = %segment.label(), bytes = data.len(), "Segment generated");
            audio.push(data);
        }
        Ok(audio)
    }

    async fn synthesize(
        &self,
        channel: &str,
        segment: &SpeechSegment,
        params: &SynthesisParams,
    ) -> Result<Vec<u8>> {
        let request = self.catalog.synthesis_request(
            &segment.voice,
            &segment.text,
            params,
            &self.config.output_format,
        );
        debug!(
            target: "delivery",
            channel = %channel,
            voice = %request.voice_name,
            model = request.model.model_id(),
            stability = request.stability,
            style = ?request.style,
            "Synthesizing speech"
        );
        let mut data = self.providers.synthesizer.synthesize(&request).await?;
        for modifier in self.catalog.modifiers_for(&segment.voice, &segment.modifiers) {
            data = self
                .providers
                .post_processor
                .apply(data, &modifier, channel)
                .await?;
        }
        Ok(data)
    }

    async fn play_alert(
        &self,
        batch: &mut AdmittedBatch,
        name: &str,
    ) -> std::result::Result<(), AbortReason> {
        let alert = match self.providers.alerts.pick(&batch.channel).await {
            Ok(Some(alert)) => alert,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!(target: "delivery", channel = %batch.channel, batch = %name, error = %e, "Alert sound unavailable, skipping");
                return Ok(());
            }
        };
        let wait = alert.duration.unwrap_or(self.config.alert_fallback);
        let alert_id = format!("{}-alert", batch.correlation_id);

        self.send(&batch.channel, Outbound::Text(protocol::start(&alert_id)))
            .await?;
        tokio::time::sleep(self.config.start_grace).await;
        self.send(&batch.channel, Outbound::Binary(alert.audio))
            .await?;
        info!(target: "delivery", channel = %batch.channel, batch = %name, wait_ms = wait.as_millis() as u64, "Alert sound sent");

        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(()),
            _ = batch.cancellation.cancelled() => Err(AbortReason::Cancelled),
        }
    }

    async fn deliver_segment(
        &self,
        batch: &mut AdmittedBatch,
        name: &str,
        index: usize,
        audio: Vec<u8>,
    ) -> std::result::Result<(), AbortReason> {
        let channel = batch.channel.clone();
        let id = batch.correlation_id.clone();

        self.transition(batch, name, DeliveryState::Sending);
        self.send(&channel, Outbound::Text(protocol::start(&id)))
            .await?;
        tokio::time::sleep(self.config.start_grace).await;

        let mut ticket = self.tickets.open(&channel, &id);
        if let Err(reason) = self.send(&channel, Outbound::Binary(audio)).await {
            self.tickets.expire(&channel, &id);
            return Err(reason);
        }
        info!(target: "delivery", channel = %channel, batch = %name, segment = index, "Audio data sent");

        self.transition(batch, name, DeliveryState::AwaitingConfirm);
        tokio::select! {
            confirmed = ticket.confirmed() => {
                if confirmed {
                    info!(target: "delivery", channel = %channel, batch = %name, segment = index, "Confirmed playing audio");
                    Ok(())
                } else {
                    Err(AbortReason::Cancelled)
                }
            }
            _ = batch.cancellation.cancelled() => {
                self.tickets.expire(&channel, &id);
                Err(AbortReason::Cancelled)
            }
            _ = tokio::time::sleep(self.config.confirm_timeout) => {
                self.tickets.expire(&channel, &id);
                Err(AbortReason::ConfirmTimeout)
            }
        }
    }

    async fn send(&self, channel: &str, payload: Outbound) -> std::result::Result<(), AbortReason> {
        self.registry
            .send(channel, payload)
            .await
            .map(|_| ())
            .map_err(|e| AbortReason::Transport(e.to_string()))
    }

    async fn abort(
        &self,
        batch: &AdmittedBatch,
        name: &str,
        reason: AbortReason,
        delivered: usize,
    ) -> DeliveryOutcome {
        self.queue.finish(&batch.channel, &batch.correlation_id);
        self.tickets.expire(&batch.channel, &batch.correlation_id);
        self.transition(batch, name, DeliveryState::Aborted);

        if reason == AbortReason::ConfirmTimeout {
            warn!(
                target: "delivery",
                channel = %batch.channel,
                batch = %name,
                timeout_secs = self.config.confirm_timeout.as_secs(),
                "Audio confirmation timed out, reloading client"
            );
            if let Err(e) = self
                .registry
                .send(&batch.channel, Outbound::Text(protocol::RELOAD.to_string()))
                .await
            {
                warn!(target: "delivery", channel = %batch.channel, error = %e, "Could not send reload");
            }
        } else {
            info!(target: "delivery", channel = %batch.channel, batch = %name, reason = ?reason, delivered, "Batch aborted");
        }
        DeliveryOutcome::Aborted { reason, delivered }
    }

    fn transition(&self, batch: &AdmittedBatch, name: &str, state: DeliveryState) {
        debug!(target: "delivery", channel = %batch.channel, batch = %name, state = ?state, "State change");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{EffectLibrary, NoAlerts, PostProcessor, SpeechSynthesizer, SynthesisRequest};
    use crate::registry::LivenessConfig;
    use crate::voices::Voice;
    use crate::{Relay, RelayConfig};
    use async_trait::async_trait;
    use mockall::mock;
    use tokio::sync::mpsc;

    mock! {
        Synth {}

        #[async_trait]
        impl SpeechSynthesizer for Synth {
            async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>>;
        }
    }

    struct NoEffects;

    #[async_trait]
    impl EffectLibrary for NoEffects {
        fn contains(&self, _name: &str) -> bool {
            false
        }

        fn names(&self) -> Vec<String> {
            vec![]
        }

        async fn load(&self, name: &str) -> Result<Vec<u8>> {
            Err(RelayError::EffectNotFound(name.to_string()))
        }
    }

    struct Passthrough;

    #[async_trait]
    impl PostProcessor for Passthrough {
        async fn apply(&self, audio: Vec<u8>, _modifier: &str, _channel: &str) -> Result<Vec<u8>> {
            Ok(audio)
        }
    }

    fn relay_with(synth: MockSynth) -> Relay {
        let config = RelayConfig {
            asset_version: "v".into(),
            liveness: LivenessConfig {
                expected_interval: Duration::from_secs(3_000),
                deadline: Duration::from_secs(3_600),
                initial_deadline: Duration::from_secs(3_600),
                keepalive_interval: Duration::from_secs(3_600),
            },
            delivery: DeliveryConfig::default(),
        };
        let providers = Providers {
            synthesizer: Arc::new(synth),
            post_processor: Arc::new(Passthrough),
            effects: Arc::new(NoEffects),
            alerts: Arc::new(NoAlerts),
        };
        Relay::new(config, VoiceCatalog::new(vec![Voice::new("alice", "a")]), providers)
            .expect("relay")
    }

    #[tokio::test]
    async fn synthesis_error_reaches_caller_and_frees_channel() {
        let mut synth = MockSynth::new();
        synth
            .expect_synthesize()
            .times(1)
            .returning(|_| Err(RelayError::Synthesis("quota exceeded".into())));
        let relay = relay_with(synth);
        let (tx, _rx) = mpsc::channel(8);
        relay.registry.register("chan", Some("v"), tx).expect("registered");

        let mut handle = relay.submit(Message::new("chan", "hello")).expect("accepted");
        let err = handle.generated().await.expect_err("synthesis fails");
        assert!(err.to_string().contains("quota exceeded"));
        assert!(!relay.queue.is_pending("chan"));
    }

    #[tokio::test]
    async fn empty_audio_is_a_generation_failure() {
        let mut synth = MockSynth::new();
        synth.expect_synthesize().returning(|_| Ok(Vec::new()));
        let relay = relay_with(synth);
        let (tx, _rx) = mpsc::channel(8);
        relay.registry.register("chan", Some("v"), tx).expect("registered");

        let handle = relay.submit(Message::new("chan", "hello")).expect("accepted");
        match handle.finished().await {
            DeliveryOutcome::Aborted {
                reason: AbortReason::Generation(msg),
                ..
            } => assert!(msg.contains("no audio")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
