//! Scripted synthesis backend for tests
//!
//! Replies are consumed in order; once the script is exhausted every call
//! gets the default reply, a well-formed artifact.

use super::provider::{LlmProvider, ProviderId};
use crate::error::PipelineError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted reply
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Raw assistant content
    Content(String),
    /// Fail as if the network call failed
    TransportError(String),
    /// Sleep, then reply with the inner value
    Delayed(Duration, Box<MockReply>),
}

/// Scripted [`LlmProvider`] for tests
///
/// # Example
///
/// ```rust
/// use opgen::synthesis::{LlmProvider, MockLlmProvider, MockReply};
///
/// # tokio_test::block_on(async {
/// let provider = MockLlmProvider::with_replies([MockReply::TransportError("offline".into())]);
/// assert!(provider.complete("system", "first").await.is_err());
///
/// // Script exhausted: every later call gets a well-formed artifact
/// let reply = provider.complete("system", "second").await.unwrap();
/// assert!(reply.contains("function_name"));
/// assert_eq!(provider.call_count(), 2);
/// # });
/// ```
pub struct MockLlmProvider {
    script: Mutex<VecDeque<MockReply>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_replies(replies: impl IntoIterator<Item = MockReply>) -> Self {
        let mock = Self::new();
        if let Ok(mut script) = mock.script.lock() {
            script.extend(replies);
        }
        mock
    }

    /// A syntactically valid artifact reply
    pub fn artifact_reply(function_name: &str) -> String {
        serde_json::json!({
            "input_type": "z.object({ id: z.string() })",
            "function": "async (corsair, data) => { return data }",
            "notes": "mock implementation",
            "pseudocode": "1. return the input",
            "function_name": function_name,
        })
        .to_string()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// User messages received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn next_reply(&self) -> MockReply {
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or_else(|| MockReply::Content(Self::artifact_reply("mockOperation")))
    }
}

async fn play(reply: MockReply) -> Result<String, PipelineError> {
    let mut reply = reply;
    loop {
        match reply {
            MockReply::Content(content) => return Ok(content),
            MockReply::TransportError(message) => return Err(PipelineError::SynthesisTransport(message)),
            MockReply::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                reply = *inner;
            }
        }
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    fn model_name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, _system: &str, user: &str) -> Result<String, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(user.to_string());
        }
        let reply = self.next_reply();
        play(reply).await
    }
}
