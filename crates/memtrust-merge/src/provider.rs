//! Completion provider seam.
//!
//! The engine never talks to a model directly: hosts implement
//! [`CompletionProvider`] over whatever client they use.

use async_trait::async_trait;
use memtrust_core::TrustError;
use serde::{Deserialize, Serialize};

/// Per-call generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionOptions {
    pub fn new(model: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            temperature,
            max_tokens,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completion returned no text")]
    Empty,

    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

pub type CompletionResult<T> = std::result::Result<T, CompletionError>;

impl From<CompletionError> for TrustError {
    fn from(err: CompletionError) -> Self {
        TrustError::Completion(err.to_string())
    }
}

/// Single-shot text completion.
///
/// Guarantees expected by callers:
/// - one call per `complete`; the engine never retries
/// - the raw model output is returned; callers trim it
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str, options: &CompletionOptions)
        -> CompletionResult<String>;
}
