//! Per-recipient bounded mailbox
//!
//! One FIFO lane per sender. `pop` drains the lane with the highest
//! effective priority, i.e. the highest priority of anything queued in that
//! lane. A FLASH message therefore pulls earlier messages from the same
//! sender ahead with it, and per-sender order is never broken. Ties go to
//! the lane whose head was enqueued first.

use super::message::Message;
use crate::types::Priority;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;

struct Queued {
    enqueued: u64,
    message: Message,
}

pub(crate) struct Mailbox {
    capacity: usize,
    lanes: HashMap<String, VecDeque<Queued>>,
    len: usize,
    next_enqueue: u64,
    notify: Arc<Notify>,
}

impl Mailbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lanes: HashMap::new(),
            len: 0,
            next_enqueue: 0,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    pub fn notify_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// Enqueue and wake the consumer. Caller checks `is_full` first.
    pub fn push(&mut self, message: Message) {
        let enqueued = self.next_enqueue;
        self.next_enqueue += 1;
        self.lanes
            .entry(message.sender().to_string())
            .or_default()
            .push_back(Queued { enqueued, message });
        self.len += 1;
        self.notify.notify_one();
    }

    pub fn pop(&mut self) -> Option<Message> {
        let mut best: Option<(&String, Priority, u64)> = None;
        for (sender, lane) in &self.lanes {
            let Some(head) = lane.front() else { continue };
            let effective = lane
                .iter()
                .map(|q| q.message.priority())
                .max()
                .unwrap_or(Priority::Routine);
            let better = match best {
                None => true,
                Some((_, p, seq)) => effective > p || (effective == p && head.enqueued < seq),
            };
            if better {
                best = Some((sender, effective, head.enqueued));
            }
        }

        let sender = best.map(|(sender, _, _)| sender.clone())?;
        let lane = self.lanes.get_mut(&sender)?;
        let queued = lane.pop_front()?;
        if lane.is_empty() {
            self.lanes.remove(&sender);
        }
        self.len -= 1;
        Some(queued.message)
    }

    /// Wake a waiting consumer without enqueuing, e.g. on retirement
    pub fn wake(&self) {
        self.notify.notify_one();
    }
}
