//! Extraction Invoker: one stateless model call per window.

use std::path::Path;

use crate::pipeline::diagnostic::dump_text;
use crate::pipeline::structuring::{
    build_window_prompt, extraction_instruction, sanitize_llm_output, InvocationError,
    ModelSession, EXTRACTION_SYSTEM_PROMPT,
};
use crate::pipeline::windowing::Window;

use super::types::{PartialExtraction, PatientId, WindowOutcome};

pub struct ExtractionInvoker<'a> {
    session: &'a ModelSession,
    instruction: String,
    system: String,
}

impl<'a> ExtractionInvoker<'a> {
    pub fn new(session: &'a ModelSession) -> Self {
        Self {
            session,
            instruction: extraction_instruction(),
            system: EXTRACTION_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    /// Run the instruction over one window of text and return the cleaned
    /// response.
    pub fn invoke(&self, window_text: &str) -> Result<String, InvocationError> {
        let prompt = build_window_prompt(&self.instruction, window_text);
        self.call(&prompt)
    }

    fn call(&self, prompt: &str) -> Result<String, InvocationError> {
        let raw = self.session.invoke(prompt, &self.system)?;
        let response = sanitize_llm_output(&raw);
        if response.is_empty() {
            return Err(InvocationError::EmptyResponse);
        }
        Ok(response)
    }

    /// Extract one window, converting any failure into a skipped-window
    /// outcome.
    pub fn extract(
        &self,
        patient: &PatientId,
        window: &Window<'_>,
        dump_dir: Option<&Path>,
    ) -> WindowOutcome {
        let prompt = build_window_prompt(&self.instruction, window.text);
        if let Some(dir) = dump_dir {
            dump_text(dir, &format!("01-window-{:03}-prompt.txt", window.index), &prompt);
        }

        match self.call(&prompt) {
            Ok(response) => {
                tracing::debug!(
                    patient = %patient,
                    window = window.index,
                    start = window.start,
                    end = window.end,
                    response = %response,
                    "Window extracted"
                );
                if let Some(dir) = dump_dir {
                    dump_text(
                        dir,
                        &format!("01-window-{:03}-response.txt", window.index),
                        &response,
                    );
                }
                WindowOutcome::Extracted(PartialExtraction {
                    window_index: window.index,
                    response,
                })
            }
            Err(error) => {
                tracing::warn!(
                    patient = %patient,
                    window = window.index,
                    start = window.start,
                    end = window.end,
                    error = %error,
                    "Window extraction failed, skipping window"
                );
                WindowOutcome::Failed {
                    window_index: window.index,
                    error,
                }
            }
        }
    }

    /// Extract every window in document order. One failure never stops the
    /// remaining windows.
    pub fn extract_all<'d>(
        &self,
        patient: &PatientId,
        windows: impl IntoIterator<Item = Window<'d>>,
        dump_dir: Option<&Path>,
    ) -> Vec<WindowOutcome> {
        windows
            .into_iter()
            .map(|window| self.extract(patient, &window, dump_dir))
            .collect()
    }
}
