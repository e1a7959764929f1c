//! Audit events for operations that opt in with `enable_audit`.

use serde::Serialize;
use serde_json::{Map, Value};
use switchyard_core::{Identifier, PrincipalKind};
use tokio::sync::mpsc;

/// One completed call of an audited operation.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub identifier: Identifier,
    pub principal_id: String,
    pub principal_kind: PrincipalKind,
    pub request_id: String,
    pub client_ip: Option<String>,
    pub params: Map<String, Value>,
    pub meta: Map<String, Value>,
    /// `0` on success, otherwise the error's envelope code.
    pub code: i32,
    pub message: String,
    pub elapsed_ms: u64,
    /// Unix milliseconds at completion.
    pub timestamp_ms: u64,
}

/// Fire-and-forget sink for audit events. Must not block.
pub trait AuditPublisher: Send + Sync {
    fn publish(&self, event: AuditEvent);
}

/// Emits each event as a structured `tracing` event on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditPublisher;

impl AuditPublisher for TracingAuditPublisher {
    fn publish(&self, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            identifier = %event.identifier,
            principal = %event.principal_id,
            principal_kind = event.principal_kind.as_str(),
            request_id = %event.request_id,
            client_ip = event.client_ip.as_deref().unwrap_or("-"),
            code = event.code,
            elapsed_ms = event.elapsed_ms,
            message = %event.message,
            "operation audited"
        );
    }
}

/// Forwards events into a bounded channel; drops them when the consumer
/// falls behind.
#[derive(Debug, Clone)]
pub struct ChannelAuditPublisher {
    tx: mpsc::Sender<AuditEvent>,
}

impl ChannelAuditPublisher {
    /// Creates the publisher and the receiving end for the consumer.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AuditPublisher for ChannelAuditPublisher {
    fn publish(&self, event: AuditEvent) {
        if let Err(err) = self.tx.try_send(event) {
            let reason = match err {
                mpsc::error::TrySendError::Full(_) => "full",
                mpsc::error::TrySendError::Closed(_) => "closed",
            };
            tracing::warn!(reason, "audit event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(code: i32) -> AuditEvent {
        AuditEvent {
            identifier: Identifier::new("user", "delete", "v1"),
            principal_id: "u1".into(),
            principal_kind: PrincipalKind::User,
            request_id: "r".into(),
            client_ip: None,
            params: Map::new(),
            meta: Map::new(),
            code,
            message: "ok".into(),
            elapsed_ms: 3,
            timestamp_ms: 0,
        }
    }

    #[tokio::test]
    async fn channel_publisher_delivers() {
        let (publisher, mut rx) = ChannelAuditPublisher::new(4);
        publisher.publish(event(0));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.principal_id, "u1");
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (publisher, mut rx) = ChannelAuditPublisher::new(1);
        publisher.publish(event(0));
        publisher.publish(event(1));
        assert_eq!(rx.try_recv().unwrap().code, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn tracing_publisher_does_not_panic() {
        TracingAuditPublisher.publish(event(1003));
    }
}
