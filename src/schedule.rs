// Numan Thabit 2026
// schedule.rs - deadline queue for delayed rule activations

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::rules::PolicyRule;

/// Current wall clock as UNIX seconds.
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// A rule-activation batch waiting for its wall-clock deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledActivation {
    pub sid: String,
    pub session_id: String,
    pub activation_time: u64,
    pub static_rules: Vec<String>,
    pub dynamic_rules: Vec<PolicyRule>,
}

#[derive(Debug)]
struct QueueEntry {
    fire_at: u64,
    seq: u64,
    activation: ScheduledActivation,
}

// Min-heap on (fire_at, seq): earliest deadline first, insertion order as
// the tie-break.
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.fire_at, other.seq).cmp(&(self.fire_at, self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

/// Cooperative dispatcher for delayed rule activations.
///
/// Deadlines are UNIX seconds; the owner polls `pop_due` from its loop tick,
/// which is accurate to the tick period. Not a real-time scheduler.
#[derive(Debug, Default)]
pub struct ActivationQueue {
    heap: BinaryHeap<QueueEntry>,
    seq: u64,
}

impl ActivationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, activation: ScheduledActivation) {
        let seq = self.seq;
        self.seq += 1;
        self.heap.push(QueueEntry {
            fire_at: activation.activation_time,
            seq,
            activation,
        });
    }

    /// Drains every activation whose deadline is at or before `now`, in
    /// deadline order.
    pub fn pop_due(&mut self, now: u64) -> Vec<ScheduledActivation> {
        let mut due = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.fire_at > now {
                break;
            }
            let entry = self.heap.pop().expect("peeked entry present");
            due.push(entry.activation);
        }
        due
    }

    /// Drops every pending activation owned by `sid`. Used when the owning
    /// session terminates before the deadline.
    pub fn cancel_subscriber(&mut self, sid: &str) {
        self.heap.retain(|entry| entry.activation.sid != sid);
    }

    /// Earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<u64> {
        self.heap.peek().map(|entry| entry.fire_at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activation(sid: &str, at: u64, rule: &str) -> ScheduledActivation {
        ScheduledActivation {
            sid: sid.into(),
            session_id: "1234".into(),
            activation_time: at,
            static_rules: vec![rule.into()],
            dynamic_rules: Vec::new(),
        }
    }

    #[test]
    fn pops_in_deadline_order() {
        let mut queue = ActivationQueue::new();
        queue.push(activation("IMSI1", 300, "late"));
        queue.push(activation("IMSI1", 100, "early"));
        queue.push(activation("IMSI1", 200, "middle"));

        assert_eq!(queue.next_deadline(), Some(100));
        let due = queue.pop_due(250);
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].static_rules, vec!["early"]);
        assert_eq!(due[1].static_rules, vec!["middle"]);
        assert_eq!(queue.len(), 1);

        // Deadline is inclusive.
        assert_eq!(queue.pop_due(300).len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn preserves_insertion_order_on_ties() {
        let mut queue = ActivationQueue::new();
        queue.push(activation("IMSI1", 100, "first"));
        queue.push(activation("IMSI1", 100, "second"));

        let due = queue.pop_due(100);
        assert_eq!(due[0].static_rules, vec!["first"]);
        assert_eq!(due[1].static_rules, vec!["second"]);
    }

    #[test]
    fn cancel_drops_only_that_subscriber() {
        let mut queue = ActivationQueue::new();
        queue.push(activation("IMSI1", 100, "a"));
        queue.push(activation("IMSI2", 100, "b"));
        queue.push(activation("IMSI1", 200, "c"));

        queue.cancel_subscriber("IMSI1");
        assert_eq!(queue.len(), 1);
        let due = queue.pop_due(500);
        assert_eq!(due[0].sid, "IMSI2");
    }
}
