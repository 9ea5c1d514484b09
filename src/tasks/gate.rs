use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::debug;

/// Normalized set of app ids named by a crawl or analysis request.
///
/// Order and repetition of the requested ids do not matter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchKey(Vec<i64>);

impl BatchKey {
    pub fn new(app_ids: &[i64]) -> Self {
        let mut ids = app_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        Self(ids)
    }

    pub fn app_ids(&self) -> &[i64] {
        &self.0
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.0.iter().map(|id| id.to_string()).collect();
        write!(f, "[{}]", ids.join(", "))
    }
}

/// Readiness flag between the crawls of one app and its analyses.
///
/// Every `clear` hands out a claim and the gate stays closed while any claim
/// is outstanding. `wait` returns once all of them have been signaled, so a
/// crawl that finishes early cannot release an analysis while a newer crawl
/// of the same app is still running. A signal wakes every waiter.
#[derive(Debug)]
pub struct OrderingGate {
    /// Crawls cleared but not yet signaled
    pending: watch::Sender<usize>,
}

impl Default for OrderingGate {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderingGate {
    /// A gate with no crawl in flight
    pub fn new() -> Self {
        let (pending, _) = watch::channel(0);
        Self { pending }
    }

    /// Close the gate until the returned claim is signaled
    pub fn clear(self: &Arc<Self>) -> GateClaim {
        self.pending.send_modify(|pending| *pending += 1);
        GateClaim {
            gate: Arc::clone(self),
        }
    }

    fn release(&self) {
        self.pending.send_modify(|pending| *pending = pending.saturating_sub(1));
    }

    pub fn is_signaled(&self) -> bool {
        *self.pending.borrow() == 0
    }

    /// Crawls still holding the gate closed
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }
}

/// One crawl's hold on a gate.
///
/// Signaled explicitly when the crawl reaches a terminal state, or on drop if
/// the crawl's task goes away first.
#[derive(Debug)]
#[must_use = "the gate stays closed until the claim is signaled"]
pub struct GateClaim {
    gate: Arc<OrderingGate>,
}

impl GateClaim {
    pub fn signal(self) {
        // Released by Drop
    }
}

impl Drop for GateClaim {
    fn drop(&mut self) {
        self.gate.release();
    }
}

/// Gates keyed by app id, shared by the crawl and analysis submitters
#[derive(Debug, Default)]
pub struct GateBook {
    gates: Mutex<HashMap<i64, Arc<OrderingGate>>>,
}

impl GateBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the gate of every app in the batch, creating gates for apps never crawled
    pub async fn clear(&self, key: &BatchKey) -> Vec<GateClaim> {
        let mut gates = self.gates.lock().await;
        key.app_ids()
            .iter()
            .map(|app_id| {
                let gate = gates.entry(*app_id).or_insert_with(|| {
                    debug!("Creating ordering gate for app_id {}", app_id);
                    Arc::new(OrderingGate::new())
                });
                gate.clear()
            })
            .collect()
    }

    /// The gate of one app, if a crawl was ever submitted for it
    pub async fn get(&self, app_id: i64) -> Option<Arc<OrderingGate>> {
        self.gates.lock().await.get(&app_id).cloned()
    }

    /// Gates of the batch's apps that have seen a crawl
    pub async fn gates(&self, key: &BatchKey) -> Vec<Arc<OrderingGate>> {
        let gates = self.gates.lock().await;
        key.app_ids()
            .iter()
            .filter_map(|app_id| gates.get(app_id).cloned())
            .collect()
    }

    /// Wait for the crawls of every app in the batch; apps never crawled pass at once
    pub async fn wait(&self, key: &BatchKey) {
        // Clone the gates out so the book's lock is not held while suspended
        for gate in self.gates(key).await {
            gate.wait().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_batch_key_ignores_order_and_repeats() {
        assert_eq!(BatchKey::new(&[3, 1, 2, 1]), BatchKey::new(&[1, 2, 3]));
        assert_ne!(BatchKey::new(&[1, 2]), BatchKey::new(&[1, 2, 3]));
        assert_eq!(BatchKey::new(&[2, 1]).to_string(), "[1, 2]");
    }

    #[test]
    fn test_wait_blocks_until_signal() {
        let gate = Arc::new(OrderingGate::new());
        let claim = gate.clear();
        let mut waiter = task::spawn(gate.wait());

        assert_pending!(waiter.poll());

        claim.signal();
        assert!(waiter.is_woken());
        assert_ready!(waiter.poll());
    }

    #[test]
    fn test_open_gate_passes_immediately() {
        let gate = OrderingGate::new();
        let mut waiter = task::spawn(gate.wait());

        assert_ready!(waiter.poll());
    }

    #[test]
    fn test_clear_blocks_again() {
        let gate = Arc::new(OrderingGate::new());
        gate.clear().signal();
        assert!(gate.is_signaled());

        let _claim = gate.clear();
        assert!(!gate.is_signaled());

        let mut waiter = task::spawn(gate.wait());
        assert_pending!(waiter.poll());
    }

    #[test]
    fn test_signal_wakes_every_waiter() {
        let gate = Arc::new(OrderingGate::new());
        let claim = gate.clear();
        let mut first = task::spawn(gate.wait());
        let mut second = task::spawn(gate.wait());

        assert_pending!(first.poll());
        assert_pending!(second.poll());

        claim.signal();
        assert_ready!(first.poll());
        assert_ready!(second.poll());
    }

    #[test]
    fn test_earlier_claim_does_not_open_gate_for_later_one() {
        let gate = Arc::new(OrderingGate::new());
        let older = gate.clear();
        let newer = gate.clear();
        let mut waiter = task::spawn(gate.wait());

        older.signal();
        assert_eq!(gate.pending(), 1);
        assert_pending!(waiter.poll());

        newer.signal();
        assert_ready!(waiter.poll());
    }

    #[test]
    fn test_claims_open_gate_in_any_order() {
        let gate = Arc::new(OrderingGate::new());
        let older = gate.clear();
        let newer = gate.clear();

        newer.signal();
        assert!(!gate.is_signaled());

        older.signal();
        assert!(gate.is_signaled());
    }

    #[test]
    fn test_dropped_claim_opens_gate() {
        let gate = Arc::new(OrderingGate::new());
        {
            let _claim = gate.clear();
            assert!(!gate.is_signaled());
        }
        assert!(gate.is_signaled());
    }

    #[tokio::test]
    async fn test_book_unknown_app_passes() {
        let book = GateBook::new();
        book.wait(&BatchKey::new(&[7])).await;
        assert!(book.get(7).await.is_none());
    }

    #[tokio::test]
    async fn test_book_gates_are_per_app() {
        let book = GateBook::new();
        let claims = book.clear(&BatchKey::new(&[1, 2])).await;
        assert_eq!(claims.len(), 2);

        assert!(!book.get(1).await.unwrap().is_signaled());
        assert!(!book.get(2).await.unwrap().is_signaled());
        assert!(book.get(3).await.is_none());

        drop(claims);
        assert!(book.get(1).await.unwrap().is_signaled());
        assert!(book.get(2).await.unwrap().is_signaled());
    }

    #[tokio::test]
    async fn test_book_subset_waits_on_shared_app() {
        let book = GateBook::new();
        let claims = book.clear(&BatchKey::new(&[1, 2])).await;

        let subset_key = BatchKey::new(&[1]);
        let mut subset = task::spawn(book.wait(&subset_key));
        assert_pending!(subset.poll());

        for claim in claims {
            claim.signal();
        }
        assert_ready!(subset.poll());
    }

    #[tokio::test]
    async fn test_book_clear_reuses_gate() {
        let book = GateBook::new();
        let key = BatchKey::new(&[1]);

        book.clear(&key).await.into_iter().for_each(GateClaim::signal);
        let gate = book.get(1).await.unwrap();
        let _claims = book.clear(&key).await;

        assert!(Arc::ptr_eq(&gate, &book.get(1).await.unwrap()));
        assert!(!gate.is_signaled());
    }
}
