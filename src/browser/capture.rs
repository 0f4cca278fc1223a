//! Record of network requests observed since the last navigation.
//!
//! Written only by the CDP reader task (from `Network.*` events) and read
//! only by the session's caller. Clearing stamps a cutoff time: events for
//! requests issued before the cutoff that arrive late are ignored, so a
//! request from a previous page can never satisfy a new wait.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Pending,
    Finished,
    Failed,
}

/// One captured request.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub request_id: String,
    pub url: String,
    pub status: Option<u16>,
    pub state: CaptureState,
    pub issued_at: DateTime<Utc>,
    seq: u64,
}

#[derive(Debug, Default)]
pub struct CaptureBuffer {
    requests: HashMap<String, CapturedRequest>,
    cleared_at: Option<DateTime<Utc>>,
    next_seq: u64,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.clear_at(Utc::now());
    }

    pub(crate) fn clear_at(&mut self, at: DateTime<Utc>) {
        self.requests.clear();
        self.cleared_at = Some(at);
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Requests in the order they were issued.
    pub fn snapshot(&self) -> Vec<CapturedRequest> {
        let mut all: Vec<CapturedRequest> = self.requests.values().cloned().collect();
        all.sort_by_key(|r| r.seq);
        all
    }

    /// Earliest finished request whose URL matches `pattern`.
    pub fn find_finished(&self, pattern: &Regex) -> Option<&CapturedRequest> {
        self.requests
            .values()
            .filter(|r| r.state == CaptureState::Finished && pattern.is_match(&r.url))
            .min_by_key(|r| r.seq)
    }

    /// Apply one CDP event. Returns `true` if the event touched the buffer.
    pub fn apply_event(&mut self, method: &str, params: &Value) -> bool {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            return false;
        };

        match method {
            "Network.requestWillBeSent" => {
                let Some(url) = params
                    .get("request")
                    .and_then(|r| r.get("url"))
                    .and_then(Value::as_str)
                else {
                    return false;
                };
                // A redirect hop of a request we never saw (issued before the
                // last clear) would otherwise re-enter with a fresh wall time.
                if params.get("redirectResponse").is_some() && !self.requests.contains_key(request_id) {
                    debug!("[capture] Dropping redirect of unknown request {}", url);
                    return false;
                }
                let issued_at = params
                    .get("wallTime")
                    .and_then(Value::as_f64)
                    .and_then(wall_time_to_datetime)
                    .unwrap_or_else(Utc::now);
                if self.cleared_at.is_some_and(|cut| issued_at < cut) {
                    debug!("[capture] Dropping stale request {}", url);
                    return false;
                }
                // Redirects reuse the request id; keep the original position.
                let seq = match self.requests.get(request_id) {
                    Some(existing) => existing.seq,
                    None => {
                        self.next_seq += 1;
                        self.next_seq
                    }
                };
                self.requests.insert(
                    request_id.to_string(),
                    CapturedRequest {
                        request_id: request_id.to_string(),
                        url: url.to_string(),
                        status: None,
                        state: CaptureState::Pending,
                        issued_at,
                        seq,
                    },
                );
                true
            }
            "Network.responseReceived" => match self.requests.get_mut(request_id) {
                Some(req) => {
                    req.status = params
                        .get("response")
                        .and_then(|r| r.get("status"))
                        .and_then(Value::as_f64)
                        .map(|s| s as u16);
                    true
                }
                None => false,
            },
            "Network.loadingFinished" => self.set_state(request_id, CaptureState::Finished),
            "Network.loadingFailed" => self.set_state(request_id, CaptureState::Failed),
            _ => false,
        }
    }

    /// Insert a completed request directly, as if its events had arrived.
    #[cfg(test)]
    pub(crate) fn push_finished(&mut self, url: &str) {
        self.next_seq += 1;
        let request_id = format!("fake.{}", self.next_seq);
        self.requests.insert(
            request_id.clone(),
            CapturedRequest {
                request_id,
                url: url.to_string(),
                status: Some(200),
                state: CaptureState::Finished,
                issued_at: Utc::now(),
                seq: self.next_seq,
            },
        );
    }

    fn set_state(&mut self, request_id: &str, state: CaptureState) -> bool {
        match self.requests.get_mut(request_id) {
            Some(req) => {
                req.state = state;
                true
            }
            None => false,
        }
    }
}

fn wall_time_to_datetime(secs: f64) -> Option<DateTime<Utc>> {
    let millis = (secs * 1000.0).round() as i64;
    DateTime::from_timestamp_millis(millis)
}
