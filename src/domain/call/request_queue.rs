//! Outstanding backend requests of one session

use crate::domain::call::backend::{CallService, PendingRequest};
use crate::domain::shared::value_objects::RequestId;
use std::collections::VecDeque;
use tracing::debug;

/// Requests issued to the call service and not yet answered, in issue order
#[derive(Debug, Default)]
pub struct RequestQueue {
    requests: VecDeque<PendingRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, request: PendingRequest) {
        self.requests.push_back(request);
    }

    /// Remove an answered request. Returns false if it was not queued.
    pub fn remove(&mut self, id: RequestId) -> bool {
        match self.requests.iter().position(|r| r.id() == id) {
            Some(index) => {
                self.requests.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.requests.iter().any(|r| r.id() == id)
    }

    /// Cancel every queued request in enqueue order and empty the queue
    pub fn cancel_all(&mut self, service: &dyn CallService) -> usize {
        let count = self.requests.len();
        while let Some(request) = self.requests.pop_front() {
            debug!("cancelling {}", request.id());
            service.cancel(request);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
