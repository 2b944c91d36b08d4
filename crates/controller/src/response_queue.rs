//! Holds responses produced while the transport is down.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tabrelay_core::{ProtocolResponse, Result};
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_QUEUED_RESPONSES: usize = 1000;

pub struct ResponseQueue {
    queue: Mutex<VecDeque<ProtocolResponse>>,
    max_size: usize,
}

impl ResponseQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            max_size: max_size.max(1),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<ProtocolResponse>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues a response. When full, the oldest entry is dropped.
    pub fn enqueue(&self, response: ProtocolResponse) {
        let mut queue = self.queue();
        if queue.len() >= self.max_size {
            if let Some(dropped) = queue.pop_front() {
                warn!(id = %dropped.id, max = self.max_size, "Response queue full, dropping oldest response");
            }
        }
        debug!(id = %response.id, queued = queue.len() + 1, "Response queued");
        queue.push_back(response);
    }

    /// Sends queued responses in order. Stops at the first failure and puts
    /// the unsent ones back at the front. Returns how many were sent.
    pub fn flush<F>(&self, mut send: F) -> usize
    where
        F: FnMut(&ProtocolResponse) -> Result<()>,
    {
        let mut pending: VecDeque<ProtocolResponse> = std::mem::take(&mut *self.queue());
        if pending.is_empty() {
            return 0;
        }
        let total = pending.len();
        let mut sent = 0;

        while let Some(response) = pending.pop_front() {
            if let Err(e) = send(&response) {
                warn!(id = %response.id, error = %e, "Flush interrupted");
                pending.push_front(response);
                let mut queue = self.queue();
                while let Some(unsent) = pending.pop_back() {
                    queue.push_front(unsent);
                }
                while queue.len() > self.max_size {
                    queue.pop_front();
                }
                break;
            }
            sent += 1;
        }

        info!(sent, total, "Flushed queued responses");
        sent
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    pub fn clear(&self) {
        self.queue().clear();
    }
}

impl Default for ResponseQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUEUED_RESPONSES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tabrelay_core::Error;

    fn response(id: &str) -> ProtocolResponse {
        ProtocolResponse::success(id, json!(null))
    }

    #[test]
    fn test_drops_oldest_when_full() {
        let queue = ResponseQueue::new(2);
        queue.enqueue(response("a"));
        queue.enqueue(response("b"));
        queue.enqueue(response("c"));
        assert_eq!(queue.len(), 2);

        let mut seen = Vec::new();
        queue.flush(|r| {
            seen.push(r.id.clone());
            Ok(())
        });
        assert_eq!(seen, vec!["b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_failed_flush_keeps_order() {
        let queue = ResponseQueue::new(10);
        for id in ["a", "b", "c"] {
            queue.enqueue(response(id));
        }

        let sent = queue.flush(|r| {
            if r.id == "b" {
                Err(Error::NotConnected("socket closed".to_string()))
            } else {
                Ok(())
            }
        });
        assert_eq!(sent, 1);
        assert_eq!(queue.len(), 2);

        let mut seen = Vec::new();
        queue.flush(|r| {
            seen.push(r.id.clone());
            Ok(())
        });
        assert_eq!(seen, vec!["b", "c"]);
    }

    #[test]
    fn test_flush_empty_and_clear() {
        let queue = ResponseQueue::default();
        assert_eq!(queue.flush(|_| Ok(())), 0);
        queue.enqueue(response("a"));
        queue.clear();
        assert!(queue.is_empty());
    }
}
