//! Reducer: folds all partial extractions of a patient into one summary
//! with exactly one model call.

use std::path::Path;

use crate::pipeline::diagnostic::dump_text;
use crate::pipeline::structuring::{
    build_summary_prompt, sanitize_llm_output, summary_instruction, InvocationError,
    ModelSession, EXTRACTION_SYSTEM_PROMPT,
};

use super::types::PartialExtraction;

pub struct Reducer<'a> {
    session: &'a ModelSession,
    instruction: String,
    system: String,
}

impl<'a> Reducer<'a> {
    pub fn new(session: &'a ModelSession) -> Self {
        Self {
            session,
            instruction: summary_instruction(),
            system: EXTRACTION_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    /// Consolidate `partials` (document order) into the final summary text.
    pub fn reduce(
        &self,
        partials: &[PartialExtraction],
        dump_dir: Option<&Path>,
    ) -> Result<String, InvocationError> {
        let responses: Vec<&str> = partials.iter().map(|p| p.response.as_str()).collect();
        let prompt = build_summary_prompt(&self.instruction, &responses);
        if let Some(dir) = dump_dir {
            dump_text(dir, "02-summary-prompt.txt", &prompt);
        }

        let raw = self.session.invoke(&prompt, &self.system)?;
        let summary = sanitize_llm_output(&raw);
        if summary.is_empty() {
            return Err(InvocationError::EmptyResponse);
        }

        tracing::debug!(partials = partials.len(), summary = %summary, "Summary produced");
        if let Some(dir) = dump_dir {
            dump_text(dir, "02-summary-response.txt", &summary);
        }
        Ok(summary)
    }
}
