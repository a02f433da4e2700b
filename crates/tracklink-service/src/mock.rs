use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{Request, Response, ServiceError, Transport};

/// A canned-response transport for tests. Responses are keyed by the full
/// URL including the query string; unknown URLs answer 404. Every call is
/// recorded.
pub struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<Response>>>,
    calls: Mutex<Vec<String>>,
    counter: AtomicU64,
    fail_transport: bool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
            fail_transport: false,
        }
    }

    /// Every request fails before reaching a route.
    pub fn with_transport_fail(mut self) -> Self {
        self.fail_transport = true;
        self
    }

    /// Answer `url` with `status` and a JSON body. Registering the same URL
    /// again queues another response; the last one keeps answering.
    pub fn respond(&self, url: &str, status: u16, body: Value) -> &Self {
        self.respond_raw(url, status, body.to_string())
    }

    pub fn respond_raw(&self, url: &str, status: u16, body: impl Into<bytes::Bytes>) -> &Self {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.to_string())
            .or_default()
            .push_back(Response::new(status, body));
        self
    }

    /// Quota endpoint answer for all credentials.
    pub fn with_rate_limit(&self, api_base: &str, used: u64, limit: u64, reset: i64) -> &Self {
        self.respond(
            &format!("{api_base}/rate_limit"),
            200,
            json!({
                "resources": {
                    "core": {
                        "limit": limit,
                        "remaining": limit.saturating_sub(used),
                        "reset": reset,
                        "used": used,
                    }
                }
            }),
        )
    }

    pub fn call_count(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Number of recorded calls whose full URL starts with `prefix`.
    pub fn calls_to(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|u| u.starts_with(prefix))
            .count()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, request: &Request) -> Result<Response, ServiceError> {
        let url = request.full_url();
        self.counter.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(url.clone());

        if self.fail_transport {
            return Err(ServiceError::Transport("mock transport failure".into()));
        }

        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        match routes.get_mut(&url) {
            Some(queue) if queue.len() > 1 => Ok(queue.pop_front().unwrap_or_else(not_found)),
            Some(queue) => Ok(queue.front().cloned().unwrap_or_else(not_found)),
            None => Ok(not_found()),
        }
    }
}

fn not_found() -> Response {
    Response::new(404, r#"{"message":"Not Found"}"#)
}
