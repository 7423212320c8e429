//! Request/Response Correlation
//!
//! Single responsibility: Hand out request identifiers and deliver each
//! `result` envelope to the one caller waiting for it.
//!
//! Identifiers restart at 1 for every connection generation. Each pending
//! entry remembers its generation so a stale waiter can never claim a
//! result addressed to a newer connection that reused its identifier.
//!
//! A waiter is released exactly once:
//! - by `resolve()` when its result arrives,
//! - by `abandon()` when its generation is torn down (`ConnectionLost`),
//! - or by dropping its `PendingResult` (the caller gave up).

use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

use super::protocol::Envelope;
use crate::error::HubError;

type ResultTx = oneshot::Sender<Result<Value, HubError>>;

struct Pending {
    generation: u64,
    tx: ResultTx,
}

/// Pending requests of the live connection, keyed by request ID.
#[derive(Default)]
pub struct Correlator {
    last_id: AtomicU64,
    pending: DashMap<u64, Pending>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh identifier space for a new generation.
    pub fn reset_ids(&self) {
        self.last_id.store(0, Ordering::SeqCst);
    }

    /// Next identifier; strictly increasing within a generation.
    pub fn next_id(&self) -> u64 {
        self.last_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Track a request before it is written.
    pub fn register(self: &Arc<Self>, generation: u64, id: u64) -> PendingResult {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, Pending { generation, tx });
        PendingResult {
            id,
            generation,
            rx,
            correlator: Arc::clone(self),
        }
    }

    /// Route a `result` envelope received on `generation`.
    ///
    /// Unknown or already-resolved identifiers are dropped.
    pub fn resolve(&self, generation: u64, envelope: Envelope) -> bool {
        let Some(id) = envelope.id else {
            debug!("Result without id dropped");
            return false;
        };

        match self.pending.remove_if(&id, |_, p| p.generation == generation) {
            Some((_, pending)) => {
                // The waiter may have gone away between removal and send
                let _ = pending.tx.send(envelope.into_outcome());
                true
            }
            None => {
                debug!(id, generation, "Result for unknown request dropped");
                false
            }
        }
    }

    /// Drop every waiter of a torn-down generation. Each sees `ConnectionLost`.
    pub fn abandon(&self, generation: u64) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, p| p.generation != generation);
        let abandoned = before.saturating_sub(self.pending.len());
        if abandoned > 0 {
            debug!(generation, abandoned, "Abandoned pending requests");
        }
        abandoned
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn forget(&self, generation: u64, id: u64) {
        self.pending.remove_if(&id, |_, p| p.generation == generation);
    }
}

/// The caller's side of a pending request.
///
/// Dropping it before completion removes the pending entry.
pub struct PendingResult {
    id: u64,
    generation: u64,
    rx: oneshot::Receiver<Result<Value, HubError>>,
    correlator: Arc<Correlator>,
}

impl PendingResult {
    /// Wait for the raw result payload.
    pub async fn wait(mut self) -> Result<Value, HubError> {
        match (&mut self.rx).await {
            Ok(outcome) => outcome,
            Err(_) => Err(HubError::ConnectionLost),
        }
    }
}

impl Drop for PendingResult {
    fn drop(&mut self) {
        self.correlator.forget(self.generation, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::protocol::decode_envelope;
    use serde_json::json;

    fn result_frame(id: u64, body: &str) -> Envelope {
        decode_envelope(&format!(r#"{{"id":{},"type":"result",{}}}"#, id, body)).unwrap()
    }

    #[test]
    fn test_ids_strictly_increasing_and_reset() {
        let correlator = Correlator::new();
        let ids: Vec<u64> = (0..5).map(|_| correlator.next_id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        correlator.reset_ids();
        assert_eq!(correlator.next_id(), 1);
    }

    #[tokio::test]
    async fn test_result_delivered_once() {
        let correlator = Arc::new(Correlator::new());
        let pending = correlator.register(1, 1);

        assert!(correlator.resolve(1, result_frame(1, r#""success":true,"result":{"a":1}"#)));
        assert!(!correlator.resolve(1, result_frame(1, r#""success":true,"result":{"a":2}"#)));

        assert_eq!(pending.wait().await.unwrap(), json!({"a": 1}));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_results_routed_by_id_not_arrival() {
        let correlator = Arc::new(Correlator::new());
        let first = correlator.register(1, 1);
        let second = correlator.register(1, 2);

        correlator.resolve(1, result_frame(2, r#""success":true,"result":"two""#));
        correlator.resolve(1, result_frame(1, r#""success":true,"result":"one""#));

        assert_eq!(first.wait().await.unwrap(), json!("one"));
        assert_eq!(second.wait().await.unwrap(), json!("two"));
    }

    #[tokio::test]
    async fn test_protocol_error_delivered() {
        let correlator = Arc::new(Correlator::new());
        let pending = correlator.register(1, 1);
        correlator.resolve(
            1,
            result_frame(1, r#""success":false,"error":{"code":"invalid_format","message":"bad"}"#),
        );
        assert!(matches!(pending.wait().await, Err(HubError::Protocol { code, .. }) if code == "invalid_format"));
    }

    #[tokio::test]
    async fn test_abandon_releases_waiters_with_connection_lost() {
        let correlator = Arc::new(Correlator::new());
        let old = correlator.register(1, 1);

        assert_eq!(correlator.abandon(1), 1);
        assert!(matches!(old.wait().await, Err(HubError::ConnectionLost)));
    }

    #[tokio::test]
    async fn test_stale_generation_cannot_claim_reused_id() {
        let correlator = Arc::new(Correlator::new());
        let stale = correlator.register(1, 1);
        correlator.abandon(1);
        drop(stale);

        let fresh = correlator.register(2, 1);
        assert!(!correlator.resolve(1, result_frame(1, r#""success":true"#)));
        assert!(correlator.resolve(2, result_frame(1, r#""success":true,"result":5"#)));
        assert_eq!(fresh.wait().await.unwrap(), json!(5));
    }

    #[test]
    fn test_dropped_waiter_removes_entry() {
        let correlator = Arc::new(Correlator::new());
        let pending = correlator.register(1, 9);
        assert_eq!(correlator.pending_count(), 1);
        drop(pending);
        assert_eq!(correlator.pending_count(), 0);
    }
}
