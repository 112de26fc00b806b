use std::sync::Arc;

use super::types::{GenerationOptions, LlmClient};
use super::InvocationError;

/// A model acquired for the duration of one pipeline run.
///
/// Acquisition checks that the model is installed once, up front; the
/// session is then shared read-only by every window and reduction call and
/// released exactly once by [`ModelSession::finish`].
pub struct ModelSession {
    client: Arc<dyn LlmClient>,
    model: String,
    options: GenerationOptions,
}

impl ModelSession {
    pub fn acquire(
        client: Arc<dyn LlmClient>,
        model: &str,
        options: GenerationOptions,
    ) -> Result<Self, InvocationError> {
        if !client.is_model_available(model)? {
            return Err(InvocationError::ModelNotFound(model.to_string()));
        }
        tracing::info!(model = %model, "Model session acquired");
        Ok(Self {
            client,
            model: model.to_string(),
            options,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    /// One stateless model call.
    pub fn invoke(&self, prompt: &str, system: &str) -> Result<String, InvocationError> {
        self.client
            .generate(&self.model, prompt, system, &self.options)
    }

    /// Release the model. A failed release is logged, not returned: the
    /// run's results are already complete at this point.
    pub fn finish(self) {
        match self.client.release(&self.model) {
            Ok(()) => tracing::info!(model = %self.model, "Model session released"),
            Err(e) => tracing::warn!(model = %self.model, error = %e, "Failed to release model"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::pipeline::structuring::MockLlmClient;

    struct CountingClient {
        generate_calls: AtomicUsize,
        release_calls: AtomicUsize,
    }

    impl CountingClient {
        fn new() -> Self {
            Self {
                generate_calls: AtomicUsize::new(0),
                release_calls: AtomicUsize::new(0),
            }
        }
    }

    impl LlmClient for CountingClient {
        fn generate(
            &self,
            model: &str,
            _prompt: &str,
            _system: &str,
            options: &GenerationOptions,
        ) -> Result<String, InvocationError> {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{model} t={}", options.temperature))
        }

        fn is_model_available(&self, _model: &str) -> Result<bool, InvocationError> {
            Ok(true)
        }

        fn list_models(&self) -> Result<Vec<String>, InvocationError> {
            Ok(vec!["gemma2:2b".into()])
        }

        fn release(&self, _model: &str) -> Result<(), InvocationError> {
            self.release_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn acquire_fails_for_missing_model() {
        let client = Arc::new(MockLlmClient::new("x").with_models(vec!["llama3:8b".into()]));
        let err = ModelSession::acquire(client, "gemma2:2b", GenerationOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, InvocationError::ModelNotFound(m) if m == "gemma2:2b"));
    }

    #[test]
    fn invoke_passes_model_and_options() {
        let client = Arc::new(CountingClient::new());
        let session =
            ModelSession::acquire(client.clone(), "gemma2:2b", GenerationOptions::default()).unwrap();
        assert_eq!(session.invoke("p", "s").unwrap(), "gemma2:2b t=0.2");
        assert_eq!(client.generate_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn finish_releases_once() {
        let client = Arc::new(CountingClient::new());
        let session =
            ModelSession::acquire(client.clone(), "gemma2:2b", GenerationOptions::default()).unwrap();
        session.finish();
        assert_eq!(client.release_calls.load(Ordering::SeqCst), 1);
    }
}
