//! Recording fake of the Koban HTTP transport.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use koban_sync::koban::{KobanRequest, KobanResponse, KobanTransport, TransportError};
use serde_json::{json, Value};

/// Answers requests from a queue of scripted responses and records every
/// request it receives. An empty queue answers with a connection error.
#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<VecDeque<Result<KobanResponse, TransportError>>>,
    requests: Mutex<Vec<KobanRequest>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: KobanResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_error(&self, error: TransportError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<KobanRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Scripted responses not consumed yet.
    pub fn pending_responses(&self) -> usize {
        self.responses.lock().unwrap().len()
    }

    /// Urls of the recorded requests, prefixed with their method.
    pub fn calls(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| format!("{} {}", r.method.as_str(), r.url))
            .collect()
    }
}

#[async_trait]
impl KobanTransport for FakeTransport {
    async fn send(&self, request: KobanRequest) -> Result<KobanResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Connect("no scripted response".into())))
    }
}

// ============================================================================
// Canned Koban answers
// ============================================================================

/// `GetOneByKey` hit.
pub fn third_found(guid: &str) -> KobanResponse {
    KobanResponse::json(200, &json!({ "Guid": guid, "Label": "Jane Doe" }))
}

/// `GetOneByKey` miss.
pub fn not_found() -> KobanResponse {
    KobanResponse::json(404, &json!({ "Message": "Not found" }))
}

/// Successful `PostOne`/`PostMany` with a single guid.
pub fn posted(guid: &str) -> KobanResponse {
    KobanResponse::json(200, &json!({ "Success": true, "Result": guid }))
}

/// Successful `PostMany` whose `Result` is an array.
pub fn posted_many(guid: &str) -> KobanResponse {
    KobanResponse::json(200, &json!({ "Success": true, "Result": [guid] }))
}

/// Answer with `Success: false`; the client does not retry it.
pub fn rejected(message: &str) -> KobanResponse {
    KobanResponse::json(200, &json!({ "Success": false, "Message": message }))
}

pub fn pdf(bytes: &[u8]) -> KobanResponse {
    KobanResponse::pdf(bytes.to_vec())
}

/// Body of the n-th recorded request.
pub fn body_of(transport: &FakeTransport, index: usize) -> Value {
    transport
        .requests()
        .get(index)
        .and_then(|r| r.body.clone())
        .unwrap_or(Value::Null)
}
