//! Pipeline diagnostic dump: writes prompts and raw model responses to disk.
//!
//! **Activation**: disabled unless `pipeline.dump_dir` is configured or the
//! `EHR_EXTRACT_DUMP_DIR` env var is set (the env var wins).
//!
//! **Output structure**:
//! ```text
//! {dump_dir}/{run_id}/
//!   00-settings.json
//!   {patient}/
//!     01-window-000-prompt.txt
//!     01-window-000-response.txt
//!     02-summary-prompt.txt
//!     02-summary-response.txt
//!     03-record.json | 03-failure.json
//! ```
//!
//! Every writer logs and swallows I/O errors: a dump never blocks or fails
//! the pipeline.

use std::path::{Path, PathBuf};

use chrono::Local;
use uuid::Uuid;

/// Env var overriding the configured dump directory.
pub const DUMP_DIR_ENV: &str = "EHR_EXTRACT_DUMP_DIR";

/// Dump location for one pipeline run.
#[derive(Debug, Clone)]
pub struct DiagnosticDump {
    run_dir: PathBuf,
}

impl DiagnosticDump {
    /// Resolve the run directory, or `None` if diagnostics are disabled or
    /// the directory cannot be created.
    pub fn resolve(configured: Option<&Path>) -> Option<Self> {
        let base = std::env::var_os(DUMP_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| configured.map(Path::to_path_buf))?;
        Self::at(&base)
    }

    /// Create a fresh run directory under `base`.
    pub fn at(base: &Path) -> Option<Self> {
        let run_id = format!(
            "{}-{}",
            Local::now().format("%Y%m%d-%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let run_dir = base.join(run_id);
        create_dir(&run_dir)?;
        tracing::info!(path = %run_dir.display(), "Diagnostic dump enabled");
        Some(Self { run_dir })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Per-patient subdirectory, created on first use.
    pub fn patient_dir(&self, patient: &str) -> Option<PathBuf> {
        let dir = self.run_dir.join(safe_component(patient));
        create_dir(&dir)?;
        Some(dir)
    }
}

fn create_dir(dir: &Path) -> Option<()> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::warn!(
            path = %dir.display(),
            error = %e,
            "Diagnostic dump: failed to create directory"
        );
        return None;
    }
    Some(())
}

/// Patient ids come from filenames; keep them from escaping the run dir.
fn safe_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        s => s.to_string(),
    }
}

/// Write a JSON artifact (any serde-serializable value).
///
/// Uses pretty-printing for human readability. Never panics.
pub fn dump_json<T: serde::Serialize>(dir: &Path, filename: &str, value: &T) {
    let path = dir.join(filename);
    match serde_json::to_string_pretty(value) {
        Ok(json) => match std::fs::write(&path, json.as_bytes()) {
            Ok(()) => tracing::debug!(
                path = %path.display(),
                size = json.len(),
                "Diagnostic dump: JSON written"
            ),
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "Diagnostic dump: failed to write JSON"
            ),
        },
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "Diagnostic dump: failed to serialize JSON"
        ),
    }
}

/// Write a text artifact (prompt, raw LLM response). Never panics.
pub fn dump_text(dir: &Path, filename: &str, text: &str) {
    let path = dir.join(filename);
    match std::fs::write(&path, text.as_bytes()) {
        Ok(()) => tracing::debug!(
            path = %path.display(),
            size = text.len(),
            "Diagnostic dump: text written"
        ),
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "Diagnostic dump: failed to write text"
        ),
    }
}
