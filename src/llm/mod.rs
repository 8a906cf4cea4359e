//! Language model access.
//!
//! - [`provider`]: resolve a model name to provider, key and endpoint
//! - [`client`]: OpenAI-compatible chat client
//! - [`stream`]: token streams returned by streaming calls
//! - [`types`]: request/response types

pub mod client;
pub mod provider;
pub mod stream;
pub mod types;

pub use client::{ChatModel, OpenAiClient};
pub use provider::{Credentials, DEFAULT_MODEL, ProviderKind, ResolvedProvider, models, resolve};
pub use stream::TokenStream;
pub use types::{ChatCompletion, ChatMessage, ChatRequest, Role, ToolCall, ToolChoice, ToolDefinition};

use crate::error::AppResult;
use std::sync::Arc;

/// Resolve `model` and build an HTTP client for it.
pub fn open_model(model: &str, credentials: &Credentials) -> AppResult<Arc<dyn ChatModel>> {
    let provider = resolve(model, credentials)?;
    Ok(Arc::new(OpenAiClient::new(provider)?))
}
