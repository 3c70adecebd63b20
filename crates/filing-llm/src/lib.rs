//! LLM provider abstraction for the filing analysis workspace
//!
//! Analysis collaborators only need one capability from a language model:
//! send a system prompt plus a user payload and get text back, optionally
//! constrained to a JSON object. This crate provides:
//!
//! - Message types for LLM communication
//! - Completion request/response types with a response-format switch
//! - The [`LLMProvider`] trait
//! - An OpenAI-compatible provider (behind the `openai` feature)

pub mod completion;
pub mod error;
pub mod messages;
pub mod provider;

// Re-export main types
pub use completion::{
    CompletionRequest, CompletionRequestBuilder, CompletionResponse, ResponseFormat, StopReason,
    TokenUsage,
};
pub use error::{LLMError, Result};
pub use messages::{Message, Role};
pub use provider::LLMProvider;

#[cfg(feature = "openai")]
pub mod providers;
