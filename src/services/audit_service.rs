//! 审计事件输出
//!
//! Sinks must not block and must never influence the decision they record.

use std::sync::{Arc, Mutex};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{models::audit::DecisionEvent, repository::AuditStore};

pub trait AuditSink: Send + Sync {
    fn record(&self, event: DecisionEvent);
}

/// Structured log line per decision on the `audit` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: DecisionEvent) {
        tracing::info!(
            target: "audit",
            event_id = %event.id,
            principal = %event.principal_id,
            kind = %event.principal_kind,
            page = %event.page,
            action = %event.action,
            target_company = ?event.target_company,
            allowed = event.allowed,
            reason = event.reason.as_deref().unwrap_or("-"),
            "authz decision"
        );
    }
}

/// Keeps events in memory; for tests and local inspection
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<DecisionEvent>>,
}

impl MemoryAuditSink {
    pub fn events(&self) -> Vec<DecisionEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: DecisionEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Hands events to a background writer; drops them when the queue is full
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<DecisionEvent>,
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, event: DecisionEvent) {
        if let Err(e) = self.tx.try_send(event) {
            metrics::counter!("audit_events_dropped_total").increment(1);
            tracing::warn!(error = %e, "Audit queue rejected decision event");
        }
    }
}

/// Spawns the task draining the audit queue into the store
pub fn spawn_audit_writer<S>(store: Arc<S>, capacity: usize) -> (ChannelAuditSink, JoinHandle<()>)
where
    S: AuditStore + ?Sized + 'static,
{
    let (tx, mut rx) = mpsc::channel::<DecisionEvent>(capacity.max(1));

    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            TracingAuditSink.record(event.clone());
            if let Err(e) = store.insert_decision_event(&event).await {
                metrics::counter!("audit_events_failed_total").increment(1);
                tracing::warn!(error = %e, event_id = %event.id, "Failed to persist decision event");
            }
        }
        tracing::info!("Audit writer stopped");
    });

    (ChannelAuditSink { tx }, handle)
}
