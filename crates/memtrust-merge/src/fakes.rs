//! Test doubles for the completion provider.
//!
//! `ScriptedCompletion` replays queued responses in order, then falls back
//! to a default, and records every prompt it received.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::provider::{CompletionError, CompletionOptions, CompletionProvider, CompletionResult};

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionCall {
    pub prompt: String,
    pub options: CompletionOptions,
}

#[derive(Debug)]
pub struct ScriptedCompletion {
    queue: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    delay: Option<Duration>,
    calls: Mutex<Vec<CompletionCall>>,
}

impl ScriptedCompletion {
    /// Always answers `text`.
    pub fn responding(text: impl Into<String>) -> Self {
        Self::with_fallback(Reply::Text(text.into()))
    }

    /// Always fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_fallback(Reply::Fail(message.into()))
    }

    fn with_fallback(fallback: Reply) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a one-off answer ahead of the fallback.
    pub fn then_respond(self, text: impl Into<String>) -> Self {
        self.queue.lock().push_back(Reply::Text(text.into()));
        self
    }

    /// Queue a one-off failure ahead of the fallback.
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.queue.lock().push_back(Reply::Fail(message.into()));
        self
    }

    /// Sleep before answering, to exercise cancellation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<CompletionCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> CompletionResult<String> {
        self.calls.lock().push(CompletionCall {
            prompt: prompt.to_string(),
            options: options.clone(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Fail(message) => Err(CompletionError::Provider(anyhow::anyhow!(message))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_then_fallback() {
        let provider = ScriptedCompletion::responding("default")
            .then_fail("rate limited")
            .then_respond("first");
        let opts = CompletionOptions::new("m", 0.1, 10);

        assert!(provider.complete("p1", &opts).await.is_err());
        assert_eq!(provider.complete("p2", &opts).await.unwrap(), "first");
        assert_eq!(provider.complete("p3", &opts).await.unwrap(), "default");
        assert_eq!(provider.call_count(), 3);
        assert_eq!(provider.calls()[1].prompt, "p2");
    }
}
