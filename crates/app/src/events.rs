use async_trait::async_trait;
use tally_core::{EventSink, ImportEvent};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Writes every event to the log as structured JSON.
#[derive(Debug, Default, Clone)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: ImportEvent) {
        let import_id = event.import_id().map(|id| id.0);
        match serde_json::to_string(&event) {
            Ok(payload) => info!(event = event.name(), ?import_id, %payload, "import event"),
            Err(e) => warn!(event = event.name(), error = %e, "event could not be serialized"),
        }
    }
}

/// Forwards events to a channel; a closed receiver drops them.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<ImportEvent>,
}

impl ChannelEventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ImportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: ImportEvent) {
        if self.tx.send(event).is_err() {
            warn!("event receiver closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{ActorId, ImportId};

    #[tokio::test]
    async fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelEventSink::channel();
        for rows in [1, 2] {
            sink.emit(ImportEvent::ImportCreated {
                import_id: ImportId(rows as i64),
                rows,
                uploaded_by: ActorId::from("op"),
            })
            .await;
        }
        assert_eq!(rx.recv().await.unwrap().import_id(), Some(ImportId(1)));
        assert_eq!(rx.recv().await.unwrap().import_id(), Some(ImportId(2)));
    }

    #[tokio::test]
    async fn emitting_after_receiver_dropped_does_not_fail() {
        let (sink, rx) = ChannelEventSink::channel();
        drop(rx);
        sink.emit(ImportEvent::AliasLearned {
            fragment: "john doe".into(),
            resident_id: tally_core::ResidentId(1),
        })
        .await;
        TracingEventSink.emit(ImportEvent::AliasLearned {
            fragment: "john doe".into(),
            resident_id: tally_core::ResidentId(1),
        })
        .await;
    }
}
