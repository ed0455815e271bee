//! In-process registry of runs suspended at a PROMPT node.
//!
//! Each suspended node holds the receiving half of a oneshot channel; the
//! resume endpoint delivers the human's input through the sending half. The
//! registry lives in engine memory only, so a run suspended at the time of a
//! process restart cannot be resumed and must be started over. Durable
//! resume would need the waiting state re-hydrated from the execution store
//! on boot.

use amber_loom_core::ExecutionId;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tokio::sync::{Mutex, oneshot};

type WaiterKey = (ExecutionId, String);

/// Pending PROMPT suspensions, keyed by execution and node id.
#[derive(Default)]
pub struct ResumeRegistry {
    waiters: Mutex<HashMap<WaiterKey, oneshot::Sender<JsonValue>>>,
}

impl ResumeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `(execution_id, node_id)` and returns the
    /// receiver the suspended run awaits on.
    ///
    /// Registering again for the same key replaces the previous waiter,
    /// whose receiver then resolves with `RecvError`. At most one listener
    /// per suspended node.
    pub async fn register(
        &self,
        execution_id: ExecutionId,
        node_id: &str,
    ) -> oneshot::Receiver<JsonValue> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .await
            .insert((execution_id, node_id.to_string()), tx);
        rx
    }

    /// Delivers resume input to a suspended node. Returns `true` when a
    /// waiter was found, `false` when nothing is waiting under that key.
    pub async fn deliver(
        &self,
        execution_id: ExecutionId,
        node_id: &str,
        input: JsonValue,
    ) -> bool {
        let waiter = self
            .waiters
            .lock()
            .await
            .remove(&(execution_id, node_id.to_string()));
        match waiter {
            // Send failure means the run stopped listening (cancelled or
            // shut down) between lookup and delivery; report not-waiting.
            Some(tx) => tx.send(input).is_ok(),
            None => {
                tracing::debug!(%execution_id, node_id, "no suspended node to resume");
                false
            }
        }
    }

    /// Drops the waiter for one node without delivering anything. The
    /// suspended run observes a closed channel.
    pub async fn abandon(&self, execution_id: ExecutionId, node_id: &str) {
        self.waiters
            .lock()
            .await
            .remove(&(execution_id, node_id.to_string()));
    }

    /// Drops every waiter belonging to `execution_id`. Called when a run
    /// reaches a terminal status.
    pub async fn clear_execution(&self, execution_id: ExecutionId) {
        self.waiters
            .lock()
            .await
            .retain(|(id, _), _| *id != execution_id);
    }

    /// Whether a waiter is currently registered for the key.
    pub async fn is_waiting(&self, execution_id: ExecutionId, node_id: &str) -> bool {
        self.waiters
            .lock()
            .await
            .contains_key(&(execution_id, node_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn delivers_to_a_registered_waiter() {
        let registry = ResumeRegistry::new();
        let execution_id = ExecutionId::new();

        let rx = registry.register(execution_id, "ask").await;
        assert!(registry.is_waiting(execution_id, "ask").await);

        assert!(registry.deliver(execution_id, "ask", json!({"answer": 7})).await);
        assert_eq!(rx.await.unwrap(), json!({"answer": 7}));
        assert!(!registry.is_waiting(execution_id, "ask").await);
    }

    #[tokio::test]
    async fn deliver_without_waiter_reports_false() {
        let registry = ResumeRegistry::new();
        assert!(!registry.deliver(ExecutionId::new(), "ask", json!(null)).await);
    }

    #[tokio::test]
    async fn second_delivery_finds_nothing() {
        let registry = ResumeRegistry::new();
        let execution_id = ExecutionId::new();

        let _rx = registry.register(execution_id, "ask").await;
        assert!(registry.deliver(execution_id, "ask", json!(1)).await);
        assert!(!registry.deliver(execution_id, "ask", json!(2)).await);
    }

    #[tokio::test]
    async fn reregistering_replaces_the_previous_waiter() {
        let registry = ResumeRegistry::new();
        let execution_id = ExecutionId::new();

        let stale = registry.register(execution_id, "ask").await;
        let fresh = registry.register(execution_id, "ask").await;

        assert!(registry.deliver(execution_id, "ask", json!("hi")).await);
        assert!(stale.await.is_err(), "replaced waiter sees a closed channel");
        assert_eq!(fresh.await.unwrap(), json!("hi"));
    }

    #[tokio::test]
    async fn abandon_closes_the_channel() {
        let registry = ResumeRegistry::new();
        let execution_id = ExecutionId::new();

        let rx = registry.register(execution_id, "ask").await;
        registry.abandon(execution_id, "ask").await;

        assert!(rx.await.is_err());
        assert!(!registry.deliver(execution_id, "ask", json!(null)).await);
    }

    #[tokio::test]
    async fn clear_execution_drops_only_that_run() {
        let registry = ResumeRegistry::new();
        let doomed = ExecutionId::new();
        let other = ExecutionId::new();

        let doomed_rx = registry.register(doomed, "ask").await;
        let _other_rx = registry.register(other, "ask").await;

        registry.clear_execution(doomed).await;

        assert!(doomed_rx.await.is_err());
        assert!(!registry.is_waiting(doomed, "ask").await);
        assert!(registry.is_waiting(other, "ask").await);
    }
}
