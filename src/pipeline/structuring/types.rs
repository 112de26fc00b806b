use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::InvocationError;

/// Reserved column under which the patient identifier is stored.
pub const PATIENT_KEY: &str = "Patient";

/// Clinical attributes recovered for one patient.
///
/// Keys keep the order the model wrote them in. A key is present only if the
/// model claimed to find that data point; absent attributes are omitted, not
/// nulled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuredRecord(Map<String, Value>);

impl StructuredRecord {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Insert or replace a value, keeping the key's original position.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for StructuredRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Sampling parameters passed with every generate call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// 0.2 produces well-formed dictionaries more reliably than 0.0.
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    /// Ollama always returns exactly one candidate; kept for configuration
    /// parity and validated to be 1.
    pub candidate_count: u32,
    /// Upper bound on generated tokens. `None` = model default.
    pub max_output_tokens: Option<u32>,
    /// Context window size. `None` = model default.
    pub num_ctx: Option<u32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            top_p: 1.0,
            top_k: 32,
            candidate_count: 1,
            max_output_tokens: Some(8192),
            num_ctx: None,
        }
    }
}

/// Local LLM client abstraction (allows mocking).
///
/// Implementations are shared read-only across patient workers, hence the
/// `Send + Sync` bound.
pub trait LlmClient: Send + Sync {
    fn generate(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
        options: &GenerationOptions,
    ) -> Result<String, InvocationError>;

    fn is_model_available(&self, model: &str) -> Result<bool, InvocationError>;

    fn list_models(&self) -> Result<Vec<String>, InvocationError>;

    /// Free whatever the backend holds for `model`. Default: nothing to free.
    fn release(&self, _model: &str) -> Result<(), InvocationError> {
        Ok(())
    }
}
