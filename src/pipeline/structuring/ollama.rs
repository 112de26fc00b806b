use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::types::{GenerationOptions, LlmClient};
use super::InvocationError;

/// Ollama HTTP client for local LLM inference.
pub struct OllamaClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
    keep_alive: Option<String>,
}

impl OllamaClient {
    /// Create a client for a local Ollama instance. Every request is bounded
    /// by `timeout_secs`.
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, InvocationError> {
        let base_url = base_url.trim_end_matches('/');
        validate_base_url(base_url)?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| InvocationError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.to_string(),
            client,
            timeout_secs,
            keep_alive: None,
        })
    }

    /// How long Ollama keeps the model loaded between calls (e.g. `"10m"`).
    pub fn with_keep_alive(mut self, keep_alive: Option<String>) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_send_error(&self, e: reqwest::Error) -> InvocationError {
        if e.is_connect() {
            InvocationError::OllamaConnection(self.base_url.clone())
        } else if e.is_timeout() {
            InvocationError::Timeout(self.timeout_secs)
        } else {
            InvocationError::HttpClient(e.to_string())
        }
    }

    fn check_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, InvocationError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(InvocationError::OllamaError {
            status: status.as_u16(),
            body,
        })
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: OllamaOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<&'a str>,
}

/// Ollama's names for the sampling parameters.
#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
}

impl From<&GenerationOptions> for OllamaOptions {
    fn from(options: &GenerationOptions) -> Self {
        Self {
            temperature: options.temperature,
            top_p: options.top_p,
            top_k: options.top_k,
            num_predict: options.max_output_tokens,
            num_ctx: options.num_ctx,
        }
    }
}

/// Unload request: no prompt, `keep_alive: 0`.
#[derive(Serialize)]
struct OllamaUnloadRequest<'a> {
    model: &'a str,
    keep_alive: u32,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    #[serde(default)]
    done_reason: Option<String>,
}

/// Response body from Ollama /api/tags
#[derive(Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

impl LlmClient for OllamaClient {
    fn generate(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
        options: &GenerationOptions,
    ) -> Result<String, InvocationError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model,
            prompt,
            system,
            stream: false,
            options: OllamaOptions::from(options),
            keep_alive: self.keep_alive.as_deref(),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        let parsed: OllamaGenerateResponse = Self::check_status(response)?
            .json()
            .map_err(|e| InvocationError::ResponseParsing(e.to_string()))?;

        if parsed.done_reason.as_deref() == Some("length") {
            tracing::warn!(
                model = %model,
                max_output_tokens = ?options.max_output_tokens,
                "Response truncated at the output token limit"
            );
        }

        if parsed.response.trim().is_empty() {
            return Err(InvocationError::EmptyResponse);
        }

        Ok(parsed.response)
    }

    fn is_model_available(&self, model: &str) -> Result<bool, InvocationError> {
        let models = self.list_models()?;
        Ok(models.iter().any(|m| model_matches(m, model)))
    }

    fn list_models(&self) -> Result<Vec<String>, InvocationError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        let parsed: OllamaTagsResponse = Self::check_status(response)?
            .json()
            .map_err(|e| InvocationError::ResponseParsing(e.to_string()))?;

        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    fn release(&self, model: &str) -> Result<(), InvocationError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaUnloadRequest {
            model,
            keep_alive: 0,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.map_send_error(e))?;
        Self::check_status(response)?;

        tracing::debug!(model = %model, "Model unloaded");
        Ok(())
    }
}

/// `gemma2` matches an installed `gemma2:latest` or any `gemma2:<tag>`;
/// a tagged request must match exactly.
pub fn model_matches(installed: &str, requested: &str) -> bool {
    if installed == requested {
        return true;
    }
    if requested.contains(':') {
        return false;
    }
    installed
        .strip_prefix(requested)
        .is_some_and(|rest| rest.starts_with(':'))
}

/// Validate that a base URL points to localhost only.
///
/// Patient records never leave the machine through the model client.
/// Accepts: localhost, 127.0.0.1, [::1]. Rejects any other host.
pub fn validate_base_url(url: &str) -> Result<(), InvocationError> {
    let non_local = || InvocationError::NonLocalEndpoint(url.to_string());

    let after_scheme = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(non_local)?;

    let host = if after_scheme.starts_with('[') {
        after_scheme
            .split(']')
            .next()
            .unwrap_or("")
            .trim_start_matches('[')
    } else {
        after_scheme
            .split([':', '/'])
            .next()
            .unwrap_or("")
    };

    match host {
        "localhost" | "127.0.0.1" | "::1" => Ok(()),
        _ => Err(non_local()),
    }
}

/// Validate a model name against the Ollama naming convention:
/// `[namespace/]model[:tag]`, each segment starting alphanumeric.
pub fn validate_model_name(name: &str) -> Result<(), InvocationError> {
    static MODEL_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]*(/[a-zA-Z0-9][a-zA-Z0-9._-]*)?(:[a-zA-Z0-9._-]+)?$")
            .expect("static regex")
    });

    if MODEL_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(InvocationError::InvalidModelName(name.to_string()))
    }
}

/// Mock LLM client for testing: returns a configurable response.
pub struct MockLlmClient {
    response: String,
    available_models: Vec<String>,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            available_models: vec!["gemma2:2b".to_string()],
        }
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.available_models = models;
        self
    }
}

impl LlmClient for MockLlmClient {
    fn generate(
        &self,
        _model: &str,
        _prompt: &str,
        _system: &str,
        _options: &GenerationOptions,
    ) -> Result<String, InvocationError> {
        if self.response.trim().is_empty() {
            return Err(InvocationError::EmptyResponse);
        }
        Ok(self.response.clone())
    }

    fn is_model_available(&self, model: &str) -> Result<bool, InvocationError> {
        Ok(self.available_models.iter().any(|m| model_matches(m, model)))
    }

    fn list_models(&self) -> Result<Vec<String>, InvocationError> {
        Ok(self.available_models.clone())
    }
}
