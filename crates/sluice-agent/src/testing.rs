//! Scripted generation client for tests
//!
//! Returns queued responses in order and records every request it sees.
//! An exhausted queue answers with a generation failure.

use crate::client::GenerationClient;
use crate::types::Conversation;
use async_trait::async_trait;
use sluice_core::{Result, SluiceError};
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone)]
enum Scripted {
    Text(String),
    Failure(String),
}

/// A request as received by [`ScriptedClient`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub system: String,
    pub conversation: Conversation,
    pub max_tokens: usize,
}

impl RecordedRequest {
    /// Text of the last user turn
    pub fn prompt(&self) -> &str {
        self.conversation.last_user_text().unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct ScriptedClient {
    queue: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, text: impl Into<String>) {
        self.lock_queue().push_back(Scripted::Text(text.into()));
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        self.lock_queue().push_back(Scripted::Failure(message.into()));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests().len()
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Scripted>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    async fn generate(
        &self,
        system_prompt: &str,
        conversation: &Conversation,
        max_tokens: usize,
    ) -> Result<String> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(RecordedRequest {
                system: system_prompt.to_string(),
                conversation: conversation.clone(),
                max_tokens,
            });

        match self.lock_queue().pop_front() {
            Some(Scripted::Text(text)) => Ok(text),
            Some(Scripted::Failure(message)) => Err(SluiceError::Generation(message)),
            None => Err(SluiceError::Generation(
                "No scripted response left".to_string(),
            )),
        }
    }

    fn model_name(&self) -> String {
        "scripted".to_string()
    }
}
