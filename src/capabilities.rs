//! External capability seams
//!
//! Chat delivery and speech synthesis live outside this process. Nodes call
//! them through these traits; the defaults below log what would be sent, or
//! hand the work to the peer node that owns the speaker. [`AlertQueue`] keeps
//! callers from ever waiting on either.

use crate::channel::{Outbox, PeerMessage};
use crate::error::NodeResult;
use crate::sensors::SensorEvent;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Outbound chat-bot messaging
#[async_trait]
pub trait ChatNotifier: Send + Sync {
    async fn send_message(&self, text: &str) -> NodeResult<()>;
}

/// Spoken alerts
#[async_trait]
pub trait VoiceAnnouncer: Send + Sync {
    /// Speak free text such as a due reminder
    async fn speak(&self, text: &str) -> NodeResult<()>;

    async fn announce(&self, event: SensorEvent) -> NodeResult<()> {
        self.speak(voice_phrase(event)).await
    }
}

/// Phrase spoken for each sensor event
pub fn voice_phrase(event: SensorEvent) -> &'static str {
    match event {
        SensorEvent::WaterLeak => "Water leak detected! Check the plumbing!",
        SensorEvent::GasAlert => "Gas leak detected! Open windows immediately!",
        SensorEvent::WaterNormal => "Water leak resolved.",
        SensorEvent::GasNormal => "Gas levels normalized.",
    }
}

/// Chat notifier that only writes to the log
#[derive(Debug, Default)]
pub struct LogChatNotifier;

#[async_trait]
impl ChatNotifier for LogChatNotifier {
    async fn send_message(&self, text: &str) -> NodeResult<()> {
        tracing::info!("Chat message: {}", text);
        Ok(())
    }
}

/// Local speaker stand-in used on the hub
#[derive(Debug, Default)]
pub struct LogVoiceAnnouncer;

#[async_trait]
impl VoiceAnnouncer for LogVoiceAnnouncer {
    async fn speak(&self, text: &str) -> NodeResult<()> {
        tracing::info!("Voice: {}", text);
        Ok(())
    }
}

/// Forwards voice alerts to the peer's `/sensor_event` endpoint
#[derive(Debug, Clone)]
pub struct PeerVoiceAnnouncer {
    outbox: Outbox,
    source: String,
}

impl PeerVoiceAnnouncer {
    pub fn new(outbox: Outbox, source: impl Into<String>) -> Self {
        Self {
            outbox,
            source: source.into(),
        }
    }
}

#[async_trait]
impl VoiceAnnouncer for PeerVoiceAnnouncer {
    async fn speak(&self, text: &str) -> NodeResult<()> {
        // The peer protocol only carries sensor events
        tracing::debug!("No local speaker, not speaking {:?}", text);
        Ok(())
    }

    async fn announce(&self, event: SensorEvent) -> NodeResult<()> {
        self.outbox.enqueue(PeerMessage::SensorEvent {
            event,
            source: self.source.clone(),
        });
        Ok(())
    }
}

/// One queued voice delivery
#[derive(Debug, Clone, PartialEq, Eq)]
enum Utterance {
    Event(SensorEvent),
    Text(String),
}

impl fmt::Display for Utterance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Utterance::Event(event) => write!(f, "voice alert {}", event.as_str()),
            Utterance::Text(text) => write!(f, "speech {:?}", text),
        }
    }
}

/// Bounded fire-and-forget queue in front of the chat and voice capabilities
///
/// Chat and voice each get their own worker so a hung chat backend cannot
/// delay a spoken alarm. Enqueueing never waits; a full queue drops the item.
#[derive(Debug, Clone)]
pub struct AlertQueue {
    chat_tx: mpsc::Sender<String>,
    voice_tx: mpsc::Sender<Utterance>,
}

impl AlertQueue {
    /// Start both delivery workers; the handle completes once every clone is dropped
    pub fn spawn(
        chat: Arc<dyn ChatNotifier>,
        voice: Arc<dyn VoiceAnnouncer>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (chat_tx, mut chat_rx) = mpsc::channel::<String>(capacity.max(1));
        let (voice_tx, mut voice_rx) = mpsc::channel::<Utterance>(capacity.max(1));

        let chat_worker = tokio::spawn(async move {
            while let Some(text) = chat_rx.recv().await {
                if let Err(e) = chat.send_message(&text).await {
                    tracing::warn!("Chat notification failed: {}", e);
                }
            }
        });
        let voice_worker = tokio::spawn(async move {
            while let Some(utterance) = voice_rx.recv().await {
                let result = match &utterance {
                    Utterance::Event(event) => voice.announce(*event).await,
                    Utterance::Text(text) => voice.speak(text).await,
                };
                if let Err(e) = result {
                    tracing::warn!("Failed {}: {}", utterance, e);
                }
            }
        });

        let handle = tokio::spawn(async move {
            let _ = tokio::join!(chat_worker, voice_worker);
            tracing::debug!("Alert queue workers stopped");
        });
        (Self { chat_tx, voice_tx }, handle)
    }

    /// Queue a chat message; returns false if it was dropped
    pub fn chat(&self, text: impl Into<String>) -> bool {
        offer(&self.chat_tx, text.into(), "chat message")
    }

    /// Queue the spoken phrase for a sensor event
    pub fn voice(&self, event: SensorEvent) -> bool {
        offer(&self.voice_tx, Utterance::Event(event), "voice alert")
    }

    /// Queue free text for the speaker
    pub fn speak(&self, text: impl Into<String>) -> bool {
        offer(&self.voice_tx, Utterance::Text(text.into()), "speech")
    }
}

fn offer<T>(tx: &mpsc::Sender<T>, item: T, what: &str) -> bool {
    match tx.try_send(item) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!("Alert queue full, dropping {}", what);
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::warn!("Alert queue closed, dropping {}", what);
            false
        }
    }
}
