//! Approval gate: a single-resolution latch per `callId`. `approve`/`deny`
//! are idempotent — the first decision wins, later calls are no-ops that
//! report whether *their* decision was the one applied.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved(Option<String>),
    Denied(String),
}

#[derive(Default)]
pub struct ApprovalGate {
    pending: Mutex<HashMap<String, oneshot::Sender<ApprovalDecision>>>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a suspension point for `call_id`, returning the receiver
    /// the dispatcher awaits on.
    pub fn register(&self, call_id: String) -> oneshot::Receiver<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(call_id, tx);
        rx
    }

    /// Resolves `call_id` with an approval. Returns `true` if this call's
    /// decision was the one applied (first-writer-wins); `false` if the
    /// call was already decided or never registered.
    pub fn approve(&self, call_id: &str, note: Option<String>) -> bool {
        self.resolve(call_id, ApprovalDecision::Approved(note))
    }

    pub fn deny(&self, call_id: &str, reason: impl Into<String>) -> bool {
        self.resolve(call_id, ApprovalDecision::Denied(reason.into()))
    }

    fn resolve(&self, call_id: &str, decision: ApprovalDecision) -> bool {
        let sender = self.pending.lock().remove(call_id);
        match sender {
            Some(sender) => sender.send(decision).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn approve_then_deny_is_first_writer_wins() {
        let gate = ApprovalGate::new();
        let rx = gate.register("c1".into());

        assert!(gate.approve("c1", None));
        assert!(!gate.deny("c1", "too late"));

        let decision = rx.await.unwrap();
        assert_eq!(decision, ApprovalDecision::Approved(None));
    }

    #[tokio::test]
    async fn deny_then_approve_is_first_writer_wins() {
        let gate = ApprovalGate::new();
        let rx = gate.register("c1".into());

        assert!(gate.deny("c1", "no"));
        assert!(!gate.approve("c1", None));

        let decision = rx.await.unwrap();
        assert_eq!(decision, ApprovalDecision::Denied("no".into()));
    }

    #[test]
    fn resolving_unknown_call_id_is_a_no_op() {
        let gate = ApprovalGate::new();
        assert!(!gate.approve("ghost", None));
    }
}
