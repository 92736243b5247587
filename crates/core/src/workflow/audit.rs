//! # Audit Sinks
//!
//! Fire-and-forget destinations for pipeline events. `record` must return
//! immediately and must never fail the run.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use tokio::sync::broadcast;

use super::events::{PipelineEvent, PipelineEventKind};
use crate::state::db::PrimerDb;
use crate::state::runs::insert_event;

/// Receives every audit event of a run
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &PipelineEvent);
}

/// Writes events to the `tracing` log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &PipelineEvent) {
        match event.kind {
            PipelineEventKind::Warning => tracing::warn!(
                run_id = %event.run_id,
                stage = %event.stage,
                data = ?event.data,
                "Stage warning"
            ),
            _ => tracing::info!(
                run_id = %event.run_id,
                kind = event.kind.as_str(),
                stage = %event.stage,
                next_stage = ?event.next_stage,
                duration_ms = event.duration_ms,
                status = event.status.as_str(),
                "Pipeline event"
            ),
        }
    }
}

/// Publishes events on a broadcast channel (SSE streaming)
#[derive(Clone)]
pub struct ChannelAuditSink {
    tx: broadcast::Sender<PipelineEvent>,
}

impl ChannelAuditSink {
    pub fn new(tx: broadcast::Sender<PipelineEvent>) -> Self {
        Self { tx }
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, event: &PipelineEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event.clone());
    }
}

/// Persists events to SQLite from a background writer thread
pub struct SqliteAuditSink {
    tx: std_mpsc::Sender<PipelineEvent>,
    _writer: JoinHandle<()>,
}

impl SqliteAuditSink {
    pub fn new(db: &PrimerDb) -> Self {
        let (tx, rx) = std_mpsc::channel::<PipelineEvent>();
        let conn = db.connection();

        let writer = std::thread::spawn(move || {
            while let Ok(event) = rx.recv() {
                let result = conn
                    .lock()
                    .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
                    .and_then(|conn| insert_event(&conn, &event));
                if let Err(e) = result {
                    tracing::warn!(event_id = %event.id, "Failed to persist audit event: {}", e);
                }
            }
        });

        Self {
            tx,
            _writer: writer,
        }
    }
}

impl AuditSink for SqliteAuditSink {
    fn record(&self, event: &PipelineEvent) {
        let _ = self.tx.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RunStore;
    use crate::workflow::PipelineStage;
    use std::time::{Duration, Instant};

    #[test]
    fn test_channel_sink_without_subscribers() {
        let (tx, _) = broadcast::channel(4);
        let sink = ChannelAuditSink::new(tx);
        sink.record(&PipelineEvent::new(
            "run-1",
            PipelineEventKind::RunStarted,
            PipelineStage::Intent,
        ));
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (tx, mut rx) = broadcast::channel(4);
        let sink = ChannelAuditSink::new(tx);
        sink.record(&PipelineEvent::new(
            "run-1",
            PipelineEventKind::RunStarted,
            PipelineStage::Intent,
        ));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.run_id, "run-1");
    }

    #[test]
    fn test_sqlite_sink_persists_in_background() {
        let db = PrimerDb::open_in_memory().unwrap();
        let sink = SqliteAuditSink::new(&db);
        sink.record(&PipelineEvent::new(
            "run-7",
            PipelineEventKind::RunStarted,
            PipelineStage::Intent,
        ));

        let store = RunStore::new(&db);
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if store.events_for("run-7").unwrap().len() == 1 {
                break;
            }
            assert!(Instant::now() < deadline, "event was never persisted");
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}
