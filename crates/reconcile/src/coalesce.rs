use std::collections::VecDeque;

use logship_core::Trigger;
use rustc_hash::FxHashSet;

/// Coalescing queue of triggers with FIFO order and fixed capacity.
///
/// Every trigger leads to the same full reconcile, so repeats of a pending
/// trigger are absorbed and overflow drops the oldest entry.
pub struct Coalescer {
    pending: FxHashSet<Trigger>,
    order: VecDeque<Trigger>,
    cap: usize,
    dropped: u64,
}

impl Coalescer {
    pub fn with_capacity(cap: usize) -> Self {
        Self { pending: FxHashSet::default(), order: VecDeque::new(), cap: cap.max(1), dropped: 0 }
    }

    pub fn len(&self) -> usize { self.order.len() }
    pub fn is_empty(&self) -> bool { self.order.is_empty() }
    pub fn dropped(&self) -> u64 { self.dropped }

    pub fn push(&mut self, t: Trigger) {
        if self.pending.contains(&t) {
            return;
        }
        if self.order.len() >= self.cap {
            if let Some(old) = self.order.pop_front() {
                self.pending.remove(&old);
                self.dropped += 1;
            }
        }
        self.pending.insert(t.clone());
        self.order.push_back(t);
    }

    /// Drain everything pending, oldest first.
    pub fn drain_ready(&mut self) -> Vec<Trigger> {
        self.pending.clear();
        self.order.drain(..).collect()
    }
}
