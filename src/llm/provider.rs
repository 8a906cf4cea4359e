//! Provider and model resolution.
//!
//! A model name resolves to exactly one provider through the static model
//! lists. The provider is usable only when its API key is present and has
//! the provider's key prefix.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Model used when nothing is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const GOOGLE_MODELS: &[&str] = &[
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
    "gemini-1.5-pro",
    "gemini-1.5-flash",
];

const DEEPSEEK_MODELS: &[&str] = &["deepseek-chat", "deepseek-reasoner"];

const OPENROUTER_MODELS: &[&str] = &[
    "deepseek/deepseek-chat-v3-0324:free",
    "google/gemini-2.0-flash-exp:free",
    "meta-llama/llama-3.3-70b-instruct:free",
    "qwen/qwen-2.5-coder-32b-instruct:free",
    "mistralai/mistral-small-3.1-24b-instruct:free",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
    DeepSeek,
    OpenRouter,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [Self::Google, Self::DeepSeek, Self::OpenRouter];

    pub fn base_url(&self) -> &'static str {
        match self {
            Self::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            Self::DeepSeek => "https://api.deepseek.com/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }

    pub fn key_prefix(&self) -> &'static str {
        match self {
            Self::Google => "AIzaSy",
            Self::DeepSeek | Self::OpenRouter => "sk-",
        }
    }

    pub fn models(&self) -> &'static [&'static str] {
        match self {
            Self::Google => GOOGLE_MODELS,
            Self::DeepSeek => DEEPSEEK_MODELS,
            Self::OpenRouter => OPENROUTER_MODELS,
        }
    }

    /// Settings key holding this provider's API key.
    pub fn settings_key(&self) -> &'static str {
        match self {
            Self::Google => "google_api_key",
            Self::DeepSeek => "deepseek_api_key",
            Self::OpenRouter => "openrouter_api_key",
        }
    }

    /// Provider whose model list contains `model`.
    pub fn for_model(model: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.models().contains(&model))
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Google => "Google",
            Self::DeepSeek => "DeepSeek",
            Self::OpenRouter => "OpenRouter",
        })
    }
}

/// API keys per provider.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deepseek: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openrouter: Option<String>,
}

impl Credentials {
    pub fn key_for(&self, provider: ProviderKind) -> Option<&str> {
        match provider {
            ProviderKind::Google => self.google.as_deref(),
            ProviderKind::DeepSeek => self.deepseek.as_deref(),
            ProviderKind::OpenRouter => self.openrouter.as_deref(),
        }
        .filter(|k| !k.is_empty())
    }

    pub fn set(&mut self, provider: ProviderKind, key: impl Into<String>) {
        let slot = match provider {
            ProviderKind::Google => &mut self.google,
            ProviderKind::DeepSeek => &mut self.deepseek,
            ProviderKind::OpenRouter => &mut self.openrouter,
        };
        *slot = Some(key.into());
    }

    /// Fill keys missing here from `other`.
    pub fn or(self, other: Credentials) -> Self {
        Self {
            google: self.google.or(other.google),
            deepseek: self.deepseek.or(other.deepseek),
            openrouter: self.openrouter.or(other.openrouter),
        }
    }
}

// keys never reach logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("google", &self.google.as_ref().map(|_| "****"))
            .field("deepseek", &self.deepseek.as_ref().map(|_| "****"))
            .field("openrouter", &self.openrouter.as_ref().map(|_| "****"))
            .finish()
    }
}

/// A model name bound to its provider, key and endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedProvider {
    pub kind: ProviderKind,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl fmt::Debug for ResolvedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedProvider")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Resolve `model` against the model lists and `credentials`.
pub fn resolve(model: &str, credentials: &Credentials) -> AppResult<ResolvedProvider> {
    let kind = ProviderKind::for_model(model)
        .ok_or_else(|| AppError::provider(format!("Unknown model '{}'", model)))?;

    let api_key = credentials.key_for(kind).ok_or_else(|| {
        AppError::provider(format!("No {} API key configured for model '{}'", kind, model))
    })?;

    if !api_key.starts_with(kind.key_prefix()) {
        return Err(AppError::provider(format!(
            "{} API key must start with '{}'",
            kind,
            kind.key_prefix()
        )));
    }

    debug!(provider = %kind, model = %model, "Resolved model provider");
    Ok(ResolvedProvider {
        kind,
        api_key: api_key.to_string(),
        base_url: kind.base_url().to_string(),
        model: model.to_string(),
    })
}

/// All known `(model, provider)` pairs.
pub fn models() -> Vec<(&'static str, ProviderKind)> {
    ProviderKind::ALL
        .into_iter()
        .flat_map(|p| p.models().iter().map(move |m| (*m, p)))
        .collect()
}
