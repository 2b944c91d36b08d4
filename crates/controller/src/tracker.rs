use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Lifecycle of a request inside the controller.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Accepted, waiting for the execution slot.
    Pending,
    /// Currently running against the browser.
    Executing,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn is_active(self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::Executing)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Executing => write!(f, "executing"),
            RequestStatus::Completed => write!(f, "completed"),
            RequestStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One request as seen by the tracker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedRequest {
    pub id: String,
    pub action: String,
    pub status: RequestStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl TrackedRequest {
    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStats {
    pub in_flight: usize,
    pub avg_duration_ms: f64,
    /// Failed / finished, rounded to two decimals.
    pub error_rate: f64,
    pub total_requests: usize,
}

/// Observes request progress for stats and hung-request detection.
#[derive(Clone, Default)]
pub struct RequestTracker {
    requests: Arc<Mutex<HashMap<String, TrackedRequest>>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn requests(&self) -> MutexGuard<'_, HashMap<String, TrackedRequest>> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn start(&self, id: &str, action: &str) {
        let request = TrackedRequest {
            id: id.to_string(),
            action: action.to_string(),
            status: RequestStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
        };
        self.requests().insert(id.to_string(), request);
        debug!(id, action, "Request accepted");
    }

    pub fn mark_executing(&self, id: &str) {
        if let Some(request) = self.requests().get_mut(id) {
            request.status = RequestStatus::Executing;
        }
    }

    /// Finishes a request; `error` decides between completed and failed.
    pub fn complete(&self, id: &str, error: Option<String>) {
        let mut requests = self.requests();
        let Some(request) = requests.get_mut(id) else {
            debug!(id, "complete() for an untracked request");
            return;
        };
        request.ended_at = Some(Utc::now());
        request.status = if error.is_some() {
            RequestStatus::Failed
        } else {
            RequestStatus::Completed
        };
        request.error = error;
        debug!(
            id,
            action = %request.action,
            status = %request.status,
            duration_ms = request.duration_ms().unwrap_or_default(),
            "Request finished"
        );
    }

    pub fn get(&self, id: &str) -> Option<TrackedRequest> {
        self.requests().get(id).cloned()
    }

    /// Pending and executing requests, oldest first.
    pub fn active_requests(&self) -> Vec<TrackedRequest> {
        let mut active: Vec<TrackedRequest> = self
            .requests()
            .values()
            .filter(|r| r.status.is_active())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        active
    }

    pub fn stats(&self) -> TrackerStats {
        let requests = self.requests();
        let in_flight = requests.values().filter(|r| r.status.is_active()).count();

        let durations: Vec<i64> = requests.values().filter_map(|r| r.duration_ms()).collect();
        let failed = requests
            .values()
            .filter(|r| r.status == RequestStatus::Failed)
            .count();

        let (avg_duration_ms, error_rate) = if durations.is_empty() {
            (0.0, 0.0)
        } else {
            let finished = durations.len() as f64;
            let avg = durations.iter().sum::<i64>() as f64 / finished;
            let rate = (failed as f64 / finished * 100.0).round() / 100.0;
            (avg, rate)
        };

        TrackerStats {
            in_flight,
            avg_duration_ms,
            error_rate,
            total_requests: requests.len(),
        }
    }

    /// Executing requests that started more than `threshold` ago.
    pub fn hung_requests(&self, threshold: Duration) -> Vec<TrackedRequest> {
        let threshold = ChronoDuration::from_std(threshold).unwrap_or_else(|_| ChronoDuration::days(36_500));
        let now = Utc::now();
        let hung: Vec<TrackedRequest> = self
            .requests()
            .values()
            .filter(|r| r.status == RequestStatus::Executing && now - r.started_at > threshold)
            .cloned()
            .collect();
        for request in &hung {
            warn!(id = %request.id, action = %request.action, "Request appears hung");
        }
        hung
    }

    /// Forgets finished requests that ended more than `retention` ago.
    pub fn cleanup(&self, retention: Duration) -> usize {
        let retention = ChronoDuration::from_std(retention).unwrap_or_else(|_| ChronoDuration::days(36_500));
        let cutoff = Utc::now() - retention;
        let mut requests = self.requests();
        let before = requests.len();
        requests.retain(|_, r| match r.ended_at {
            Some(ended) => ended > cutoff,
            None => true,
        });
        let removed = before - requests.len();
        if removed > 0 {
            debug!(removed, "Cleaned up finished requests");
        }
        removed
    }
}
