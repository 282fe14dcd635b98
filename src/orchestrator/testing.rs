//! Mock provider for orchestrator tests

use super::Orchestrator;
use crate::config::Settings;
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService, Usage};
use crate::persona::PersonaId;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Mock provider that returns queued responses, optionally after a delay,
/// and tracks how many calls overlap
pub struct MockLlmService {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    /// Returned once the queue is empty; `None` yields a network error
    default_reply: Option<String>,
    delay: Option<Duration>,
    panic_on_call: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmService {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            default_reply: None,
            delay: None,
            panic_on_call: false,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_default_reply(mut self, text: impl Into<String>) -> Self {
        self.default_reply = Some(text.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn panicking() -> Self {
        Self {
            panic_on_call: true,
            ..Self::new()
        }
    }

    pub fn queue_reply(&self, text: impl Into<String>) {
        self.responses.lock().unwrap().push_back(Ok(reply(text)));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Highest number of calls that were running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

fn reply(text: impl Into<String>) -> LlmResponse {
    LlmResponse {
        text: text.into(),
        usage: Usage {
            input_tokens: 10,
            output_tokens: 5,
        },
    }
}

#[async_trait]
impl LlmService for MockLlmService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.panic_on_call {
            panic!("mock provider panicked");
        }

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let queued = self.responses.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| match &self.default_reply {
            Some(text) => Ok(reply(text.clone())),
            None => Err(LlmError::network("No mock response queued")),
        })
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

/// Orchestrator over a temporary roster root, wired to `mock`
pub async fn test_relay(
    settings: Settings,
    mock: MockLlmService,
) -> (TempDir, Arc<Orchestrator>, Arc<MockLlmService>) {
    let root = tempfile::tempdir().unwrap();
    let mock = Arc::new(mock);
    let llm: Arc<dyn LlmService> = mock.clone();
    let orchestrator = Orchestrator::from_root(root.path(), llm, settings)
        .await
        .unwrap();
    (root, Arc::new(orchestrator), mock)
}

pub async fn write_input(orchestrator: &Orchestrator, persona: PersonaId, text: &str) {
    let slot = orchestrator.slot(persona).unwrap();
    tokio::fs::write(&slot.channels.input, text).await.unwrap();
}

pub async fn read_output(orchestrator: &Orchestrator, persona: PersonaId) -> String {
    let slot = orchestrator.slot(persona).unwrap();
    tokio::fs::read_to_string(&slot.channels.output)
        .await
        .unwrap()
}

/// Poll until `check` holds, giving up after roughly five seconds
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
