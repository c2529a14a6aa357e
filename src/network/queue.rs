//! Arrival queue
//!
//! Every decoded datagram is pushed here by the receive loop so that a
//! reliable-channel waiter can watch for its ACK. The waiter is the
//! only consumer that removes messages, and it sequesters non-matching
//! ones only temporarily: they are restored in their original relative
//! order before `wait_for_ack` returns, so nothing real is ever lost
//! to an ACK search.
//!
//! Only one waiter can exist at a time because it holds the reliable
//! channel's send lock for the duration of the call.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::protocol::{MessageType, WireMessage};

/// Bound on queued messages. Old ACKs that no waiter ever claimed age
/// out from the front.
pub const ARRIVAL_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Default)]
pub struct ArrivalQueue {
    inner: Mutex<VecDeque<WireMessage>>,
    notify: Notify,
}

impl ArrivalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the receive loop for every decoded datagram.
    pub fn push(&self, message: WireMessage) {
        let mut queue = self.inner.lock().unwrap();
        if queue.len() >= ARRIVAL_QUEUE_CAPACITY {
            queue.pop_front();
            tracing::debug!("arrival queue full, dropping oldest entry");
        }
        queue.push_back(message);
        drop(queue);
        self.notify.notify_one();
    }

    /// Block until an ACK matching `sequence` arrives, or until the
    /// timeout elapses. Messages drained while searching are put back
    /// before returning, in the order they originally arrived.
    pub async fn wait_for_ack(&self, sequence: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut set_aside: Vec<WireMessage> = Vec::new();

        let found = loop {
            if self.drain_until_match(sequence, &mut set_aside) {
                break true;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(deadline) => break false,
            }
        };

        self.restore(set_aside);
        found
    }

    /// Pop queued messages until the matching ACK is found or the
    /// queue runs dry. Non-matching messages land in `set_aside`.
    fn drain_until_match(&self, sequence: u64, set_aside: &mut Vec<WireMessage>) -> bool {
        let mut queue = self.inner.lock().unwrap();
        while let Some(message) = queue.pop_front() {
            if is_matching_ack(&message, sequence) {
                return true;
            }
            set_aside.push(message);
        }
        false
    }

    /// Put sequestered messages back at the front, preserving their
    /// original relative order ahead of anything that arrived since.
    fn restore(&self, set_aside: Vec<WireMessage>) {
        if set_aside.is_empty() {
            return;
        }
        let mut queue = self.inner.lock().unwrap();
        for message in set_aside.into_iter().rev() {
            queue.push_front(message);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> Vec<WireMessage> {
        self.inner.lock().unwrap().iter().cloned().collect()
    }
}

fn is_matching_ack(message: &WireMessage, sequence: u64) -> bool {
    message.message_type() == Some(MessageType::Ack) && message.ack_number() == Some(sequence)
}
