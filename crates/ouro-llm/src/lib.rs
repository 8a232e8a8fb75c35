#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ouro-llm** – Language-model client surface for Ouroboros.
//!
//! The language model is an external collaborator: the core needs plain
//! completion and completion-with-system-prompt, nothing more. Providers may
//! expose richer capabilities (grounded search, thinking metadata); those are
//! modeled as optional accessor traits and every caller must work when they
//! are absent.
//!
//! The crate also carries the reply-extraction helpers shared by the
//! generator and the refiner, and a scripted [`MockModel`] for tests.

use anyhow::Result;
use async_trait::async_trait;

pub mod extract;
pub mod mock;

pub use extract::{extract_code_block, extract_json};
pub use mock::MockModel;

/// Ceiling on prompt size handed to a provider, to bound memory.
pub const MAX_PROMPT_LEN: usize = 256 * 1024;

/// Errors surfaced by language-model calls.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The prompt exceeded [`MAX_PROMPT_LEN`].
    #[error("prompt too long: {0} > {MAX_PROMPT_LEN} bytes")]
    PromptTooLong(usize),
    /// The provider returned an error.
    #[error("provider failure: {0}")]
    Provider(String),
}

/// Minimal completion surface the core requires.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete `prompt` and return the raw reply text.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Complete `user` under `system` and return the raw reply text.
    async fn complete_with_system(&self, system: &str, user: &str) -> Result<String>;

    /// Provider name, for logging.
    fn provider_name(&self) -> &str {
        "unknown"
    }

    /// Grounded-search capability, when the provider has one.
    fn grounding(&self) -> Option<&dyn GroundedSearch> {
        None
    }

    /// Thinking-metadata capability, when the provider has one.
    fn thinking(&self) -> Option<&dyn ThinkingMetadata> {
        None
    }
}

/// Optional capability: the provider can ground replies in live search.
pub trait GroundedSearch: Send + Sync {
    /// Toggle grounding for subsequent calls.
    fn set_grounding(&self, enabled: bool);

    /// Whether the last reply used grounding.
    fn was_grounded(&self) -> bool;
}

/// Optional capability: the provider exposes reasoning metadata.
pub trait ThinkingMetadata: Send + Sync {
    /// Tokens the provider spent thinking on the last call, when reported.
    fn thinking_tokens(&self) -> Option<u64>;

    /// Opaque thought signature of the last call, when reported.
    fn thought_signature(&self) -> Option<String>;
}

/// Guard a prompt against the size ceiling before handing it to a provider.
pub fn check_prompt(prompt: &str) -> Result<(), ModelError> {
    if prompt.len() > MAX_PROMPT_LEN {
        return Err(ModelError::PromptTooLong(prompt.len()));
    }
    Ok(())
}
