//! FIFO of job ids awaiting admission.

use std::collections::VecDeque;

use crate::job::JobId;

#[derive(Debug, Default)]
pub struct JobQueue {
    items: VecDeque<JobId>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unless already present. Returns true if the id was added.
    pub fn push_back(&mut self, id: JobId) -> bool {
        if self.contains(&id) {
            return false;
        }
        self.items.push_back(id);
        true
    }

    /// Put a job back at the head (admission deferred for lack of units).
    pub fn push_front(&mut self, id: JobId) {
        if !self.contains(&id) {
            self.items.push_front(id);
        }
    }

    pub fn pop_front(&mut self) -> Option<JobId> {
        self.items.pop_front()
    }

    /// Remove every occurrence of `id`. Returns true if it was queued.
    pub fn remove(&mut self, id: &JobId) -> bool {
        let before = self.items.len();
        self.items.retain(|queued| queued != id);
        before != self.items.len()
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.items.contains(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
