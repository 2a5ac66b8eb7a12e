//! Ingestion progress events and the per-document fan-out bus.
//!
//! The pipeline publishes fine-grained progress for one `(session, document)`
//! pair; any number of concurrently attached subscribers receive the same
//! ordered sequence. Events are transient: there is no replay, so a late
//! subscriber only sees what happens after it attached and must reconcile
//! against the document list. The channel closes after the terminal event.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::{DocStatus, ProcessingPhase};

/// Buffered events per channel before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 64;

/// One progress event for a document, in its wire shape.
///
/// Serializes to `{"processing_phase":..., "progress_percent":...}` for
/// incremental updates, `{"event":"complete","status":...}` or
/// `{"event":"error","message":...}` for terminal events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressEvent {
    Phase {
        processing_phase: ProcessingPhase,
        progress_percent: u8,
    },
    Terminal(TerminalEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TerminalEvent {
    Complete { status: DocStatus },
    Error { message: String },
}

impl ProgressEvent {
    pub fn phase(phase: ProcessingPhase, percent: u8) -> Self {
        ProgressEvent::Phase {
            processing_phase: phase,
            progress_percent: percent,
        }
    }

    pub fn complete(status: DocStatus) -> Self {
        ProgressEvent::Terminal(TerminalEvent::Complete { status })
    }

    pub fn error(message: impl Into<String>) -> Self {
        ProgressEvent::Terminal(TerminalEvent::Error {
            message: message.into(),
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Terminal(_))
    }
}

/// Fan-out bus keyed by `(session_id, document_id)`.
///
/// Every subscriber to a key gets its own receiver on the same broadcast
/// channel, so all of them observe identical ordered sequences. Publishing
/// a terminal event drops the sender, which closes every receiver once it
/// has drained. The bus holds no event history.
#[derive(Default)]
pub struct ProgressBus {
    channels: Mutex<HashMap<(String, String), broadcast::Sender<ProgressEvent>>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to a document's progress stream. Creates the channel if the
    /// pipeline has not published yet, so subscribers can attach early.
    pub fn subscribe(
        &self,
        session_id: &str,
        document_id: &str,
    ) -> broadcast::Receiver<ProgressEvent> {
        let key = (session_id.to_string(), document_id.to_string());
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish an event to every current subscriber of the key.
    ///
    /// A terminal event also tears the channel down. Events published with
    /// no channel open (nobody ever subscribed) are dropped: they are
    /// transient by contract.
    pub fn publish(&self, session_id: &str, document_id: &str, event: ProgressEvent) {
        let key = (session_id.to_string(), document_id.to_string());
        let sender = {
            let mut channels = self.channels.lock().unwrap();
            if event.is_terminal() {
                channels.remove(&key)
            } else {
                channels.get(&key).cloned()
            }
        };
        if let Some(tx) = sender {
            // Err here just means no receivers are attached right now.
            let _ = tx.send(event);
        }
    }

    /// Number of open channels (diagnostics).
    pub fn open_channels(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    /// Drops a key's channel if nothing is listening anymore. Called by
    /// subscribers that bail out early (e.g. the document was already
    /// terminal) so abandoned channels do not accumulate.
    pub fn release_if_idle(&self, session_id: &str, document_id: &str) {
        let key = (session_id.to_string(), document_id.to_string());
        let mut channels = self.channels.lock().unwrap();
        if let Some(tx) = channels.get(&key) {
            if tx.receiver_count() == 0 {
                channels.remove(&key);
            }
        }
    }

    /// Number of receivers currently attached to a key's channel.
    pub fn subscriber_count(&self, session_id: &str, document_id: &str) -> usize {
        let key = (session_id.to_string(), document_id.to_string());
        self.channels
            .lock()
            .unwrap()
            .get(&key)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    fn sample_sequence() -> Vec<ProgressEvent> {
        vec![
            ProgressEvent::phase(ProcessingPhase::PdfExtraction, 10),
            ProgressEvent::phase(ProcessingPhase::TextChunking, 30),
            ProgressEvent::complete(DocStatus::Ready),
        ]
    }

    #[tokio::test]
    async fn two_subscribers_observe_identical_sequences() {
        let bus = ProgressBus::new();
        let mut rx_a = bus.subscribe("s1", "d1");
        let mut rx_b = bus.subscribe("s1", "d1");

        for ev in sample_sequence() {
            bus.publish("s1", "d1", ev);
        }

        let mut seen_a = Vec::new();
        let mut seen_b = Vec::new();
        while let Ok(ev) = rx_a.recv().await {
            seen_a.push(ev);
        }
        while let Ok(ev) = rx_b.recv().await {
            seen_b.push(ev);
        }

        assert_eq!(seen_a, sample_sequence());
        assert_eq!(seen_b, sample_sequence());
    }

    #[tokio::test]
    async fn channel_closes_after_terminal_event() {
        let bus = ProgressBus::new();
        let mut rx = bus.subscribe("s1", "d1");

        bus.publish("s1", "d1", ProgressEvent::complete(DocStatus::Ready));
        assert_eq!(bus.open_channels(), 0);

        assert_eq!(
            rx.recv().await.unwrap(),
            ProgressEvent::complete(DocStatus::Ready)
        );
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
    }

    #[tokio::test]
    async fn late_subscriber_sees_only_future_events() {
        let bus = ProgressBus::new();
        let mut early = bus.subscribe("s1", "d1");

        bus.publish(
            "s1",
            "d1",
            ProgressEvent::phase(ProcessingPhase::PdfExtraction, 10),
        );

        let mut late = bus.subscribe("s1", "d1");
        bus.publish("s1", "d1", ProgressEvent::complete(DocStatus::Ready));

        assert_eq!(
            early.recv().await.unwrap(),
            ProgressEvent::phase(ProcessingPhase::PdfExtraction, 10)
        );
        assert_eq!(
            early.recv().await.unwrap(),
            ProgressEvent::complete(DocStatus::Ready)
        );

        // The late subscriber never sees the earlier phase event.
        assert_eq!(
            late.recv().await.unwrap(),
            ProgressEvent::complete(DocStatus::Ready)
        );
        assert!(matches!(late.recv().await, Err(RecvError::Closed)));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let bus = ProgressBus::new();
        // No channel open: nothing to deliver to, nothing retained.
        bus.publish(
            "s1",
            "d1",
            ProgressEvent::phase(ProcessingPhase::PdfExtraction, 10),
        );
        assert_eq!(bus.open_channels(), 0);
    }

    #[test]
    fn wire_shapes() {
        let phase = ProgressEvent::phase(ProcessingPhase::EntityExtraction, 45);
        assert_eq!(
            serde_json::to_value(&phase).unwrap(),
            serde_json::json!({"processing_phase": "entity_extraction", "progress_percent": 45})
        );

        let done = ProgressEvent::complete(DocStatus::Ready);
        assert_eq!(
            serde_json::to_value(&done).unwrap(),
            serde_json::json!({"event": "complete", "status": "ready"})
        );

        let failed = ProgressEvent::error("graph insertion failed");
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            serde_json::json!({"event": "error", "message": "graph insertion failed"})
        );

        // Round-trips through the untagged representation.
        let back: ProgressEvent =
            serde_json::from_str(&serde_json::to_string(&phase).unwrap()).unwrap();
        assert_eq!(back, phase);
        let back: ProgressEvent =
            serde_json::from_str(&serde_json::to_string(&done).unwrap()).unwrap();
        assert_eq!(back, done);
    }
}
