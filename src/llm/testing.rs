//! Scripted [`LlmCall`] fakes for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::models::ChatMessage;

use super::{LlmCall, LlmError};

/// One recorded call for assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f64,
}

type Script = Box<dyn Fn(usize) -> Result<String, LlmError> + Send + Sync>;

/// An [`LlmCall`] that records every call and answers from a script.
pub struct ScriptedLlm {
    calls: Mutex<Vec<RecordedCall>>,
    counter: AtomicUsize,
    script: Script,
}

impl ScriptedLlm {
    pub fn with_script(
        script: impl Fn(usize) -> Result<String, LlmError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
            script: Box::new(script),
        })
    }

    /// Answers `"response N"` for the N-th call (zero-based).
    pub fn counting() -> Arc<Self> {
        Self::with_script(|i| Ok(format!("response {i}")))
    }

    /// Fails every call with a non-retryable provider error.
    pub fn failing() -> Arc<Self> {
        Self::with_script(|_| {
            Err(LlmError::InvalidResponse("scripted failure".to_string()))
        })
    }

    /// Fails every call with the distinguished quota error.
    pub fn quota() -> Arc<Self> {
        Self::with_script(|_| Err(LlmError::Quota { provider: "openai".to_string() }))
    }

    /// Every call recorded so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl LlmCall for ScriptedLlm {
    async fn call(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        model: &str,
        temperature: f64,
    ) -> Result<String, LlmError> {
        self.calls.lock().push(RecordedCall {
            system: system_prompt.to_string(),
            messages: messages.to_vec(),
            model: model.to_string(),
            temperature,
        });
        let index = self.counter.fetch_add(1, Ordering::SeqCst);
        (self.script)(index)
    }
}
