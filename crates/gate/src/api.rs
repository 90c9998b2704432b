//! Request and response types of the generation service.
//!
//! Requests deserialize with the defaults callers may omit; responses
//! serialize to the JSON bodies an HTTP front end returns as-is.

use std::time::Duration;

use admission_authn::{Permission, PermissionSet};
use admission_cache::GenerationParams;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{GateError, Result};

/// Default `max_tokens`.
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Largest accepted `max_tokens`.
pub const MAX_TOKENS_LIMIT: u32 = 8192;

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f64 = 0.1;

/// Default nucleus sampling mass.
pub const DEFAULT_TOP_P: f64 = 0.95;

/// Longest accepted prompt, in characters.
pub const MAX_PROMPT_CHARS: usize = 50_000;

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_top_p() -> f64 {
    DEFAULT_TOP_P
}

/// A text generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct GenerateRequest {
    /// Input text.
    #[builder(into)]
    pub prompt: String,
    /// Upper bound on generated tokens, `1..=8192`.
    #[serde(default = "default_max_tokens")]
    #[builder(default = DEFAULT_MAX_TOKENS)]
    pub max_tokens: u32,
    /// Sampling temperature, `0.0..=2.0`.
    #[serde(default = "default_temperature")]
    #[builder(default = DEFAULT_TEMPERATURE)]
    pub temperature: f64,
    /// Nucleus sampling mass, `0.1..=1.0`.
    #[serde(default = "default_top_p")]
    #[builder(default = DEFAULT_TOP_P)]
    pub top_p: f64,
}

impl GenerateRequest {
    /// Checks parameter bounds.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidRequest`] naming the first field out of
    /// bounds.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(GateError::invalid_request("prompt must not be empty"));
        }
        if self.prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(GateError::invalid_request("prompt too long"));
        }
        if !(1..=MAX_TOKENS_LIMIT).contains(&self.max_tokens) {
            return Err(GateError::invalid_request(format!(
                "max_tokens must be between 1 and {MAX_TOKENS_LIMIT}"
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(GateError::invalid_request("temperature must be between 0.0 and 2.0"));
        }
        if !(0.1..=1.0).contains(&self.top_p) {
            return Err(GateError::invalid_request("top_p must be between 0.1 and 1.0"));
        }
        Ok(())
    }

    /// Validates and converts into engine parameters.
    ///
    /// # Errors
    ///
    /// As [`validate`](Self::validate).
    pub fn into_params(self) -> Result<GenerationParams> {
        self.validate()?;
        Ok(GenerationParams {
            prompt: self.prompt,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
        })
    }
}

/// Result of [`GenerationService::generate`](crate::GenerationService::generate).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateResponse {
    /// Generated text.
    pub response: String,
    /// Whether the text came from a cache tier.
    pub cached: bool,
    /// Wall time spent serving the request.
    #[serde(with = "humantime_serde")]
    pub generation_time: Duration,
    /// The admitted caller.
    pub identity_id: String,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `user`, `assistant` or `system`.
    pub role: String,
    /// Message text.
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    /// Creates a `user` message.
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_owned(), content: content.into() }
    }

    /// Creates an `assistant` message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_owned(), content: content.into() }
    }
}

/// A chat-style generation request. Only the last `user` message is sent to
/// the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation so far.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// See [`GenerateRequest::max_tokens`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// See [`GenerateRequest::temperature`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// See [`GenerateRequest::top_p`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

impl ChatRequest {
    /// Creates a request from `messages` with default parameters.
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages, ..Self::default() }
    }

    /// Extracts the generation request: the last `user` message as prompt,
    /// unset parameters defaulted.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidRequest`] if there are no messages, the
    /// last `user` message is empty or missing, or a parameter is out of
    /// bounds.
    pub fn to_generate_request(&self) -> Result<GenerateRequest> {
        if self.messages.is_empty() {
            return Err(GateError::invalid_request("no messages provided"));
        }
        let prompt = self
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| GateError::invalid_request("no user message found"))?;

        let request = GenerateRequest {
            prompt: prompt.to_owned(),
            max_tokens: self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            top_p: self.top_p.unwrap_or(DEFAULT_TOP_P),
        };
        request.validate()?;
        Ok(request)
    }
}

/// One completion choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatChoice {
    /// The assistant reply.
    pub message: ChatMessage,
    /// Always `stop`.
    pub finish_reason: String,
}

/// Whitespace-delimited word counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChatUsage {
    /// Words in the prompt.
    pub prompt_tokens: usize,
    /// Words in the reply.
    pub completion_tokens: usize,
    /// Sum of both.
    pub total_tokens: usize,
}

impl ChatUsage {
    /// Counts words in `prompt` and `completion`.
    #[must_use]
    pub fn count(prompt: &str, completion: &str) -> Self {
        let prompt_tokens = prompt.split_whitespace().count();
        let completion_tokens = completion.split_whitespace().count();
        Self { prompt_tokens, completion_tokens, total_tokens: prompt_tokens + completion_tokens }
    }
}

/// Result of [`GenerationService::chat_completion`](crate::GenerationService::chat_completion).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletion {
    /// A single choice.
    pub choices: Vec<ChatChoice>,
    /// Engine model name.
    pub model: String,
    /// Word counts.
    pub usage: ChatUsage,
    /// Whether the reply came from a cache tier.
    pub cached: bool,
}

/// An API key provisioning request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateApiKeyRequest {
    /// Owner of the new key.
    pub user_id: String,
    /// Permission tags; `{generate}` if omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
    /// Daily ceiling; the provisioning default if omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_limit: Option<u64>,
}

impl CreateApiKeyRequest {
    /// Creates a request for `user_id` with default permissions and limit.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), permissions: None, daily_limit: None }
    }

    /// Parses the requested permission tags.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidRequest`] for an unknown tag.
    pub fn permission_set(&self) -> Result<Option<PermissionSet>> {
        let Some(tags) = &self.permissions else {
            return Ok(None);
        };
        tags.iter()
            .map(|tag| {
                tag.trim()
                    .parse::<Permission>()
                    .map_err(|_| GateError::invalid_request(format!("unknown permission `{tag}`")))
            })
            .collect::<Result<PermissionSet>>()
            .map(Some)
    }
}

/// A newly provisioned key. The raw key is shown once.
pub struct CreatedApiKey {
    /// The raw key.
    pub api_key: Zeroizing<String>,
    /// Owner of the key.
    pub user_id: String,
    /// Granted permissions.
    pub permissions: PermissionSet,
    /// Daily ceiling.
    pub daily_limit: u64,
    /// Identity of the admin that created it.
    pub created_by: String,
}

impl std::fmt::Debug for CreatedApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatedApiKey")
            .field("user_id", &self.user_id)
            .field("permissions", &self.permissions)
            .field("daily_limit", &self.daily_limit)
            .field("created_by", &self.created_by)
            .finish_non_exhaustive()
    }
}

/// Usage report for the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsReport {
    /// The admitted caller.
    pub identity_id: String,
    /// Requests counted today, including this one.
    pub requests_today: u64,
    /// Daily ceiling; `None` for signed assertions.
    pub daily_limit: Option<u64>,
    /// In-process cache entries.
    pub cache_entries: u64,
    /// Whether the shared store answered `PING`.
    pub store_connected: bool,
}

/// Overall liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Engine ready and store reachable.
    Healthy,
    /// Something is down; requests may fail.
    Degraded,
}

/// Liveness report, served without admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Overall status.
    pub status: HealthStatus,
    /// Whether the engine can serve.
    pub engine_ready: bool,
    /// Whether the shared store answered `PING`.
    pub store_connected: bool,
    /// In-process cache entries.
    pub cache_entries: u64,
}
