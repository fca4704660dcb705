//! LLM client: one call in, one text out.
//!
//! The client handles transport, both JSON and SSE response bodies, and
//! timeouts. It deliberately does not retry; the detect-optimise loop
//! owns that policy.

mod client;
mod types;

pub use client::{ClientConfig, HttpLlmClient, LlmClient};
pub use types::{CompletionRequest, CompletionResponse, FinishReason, SamplingParams, TokenUsage};
