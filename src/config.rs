use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::structuring::{validate_base_url, validate_model_name, GenerationOptions};
use crate::pipeline::windowing::{WindowConfig, WindowConfigError};

/// Application-level constants
pub const APP_NAME: &str = "ehr-extract";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Looked up in the working directory when no `--config` is given.
pub const LOCAL_CONFIG_FILE: &str = "ehr-extract.toml";

/// Default tracing filter when neither `RUST_LOG` nor a configured filter is set.
pub fn default_log_filter() -> &'static str {
    "ehr_extract=info,warn"
}

/// Per-user configuration file: `<config_dir>/ehr-extract/config.toml`.
pub fn user_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.toml"))
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid windowing: {0}")]
    Window(#[from] WindowConfigError),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

// ═══════════════════════════════════════════
// Settings
// ═══════════════════════════════════════════

/// Run settings. Every section and field is optional in TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub windowing: WindowingSettings,
    #[serde(default)]
    pub patients: PatientSettings,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowingSettings {
    /// Characters per window
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared by consecutive windows
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

fn default_chunk_size() -> usize {
    5000
}

fn default_overlap() -> usize {
    100
}

impl Default for WindowingSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientSettings {
    /// Substring that marks a filename prefix as a patient id
    #[serde(default = "default_identifier_prefix")]
    pub identifier_prefix: String,
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Tesseract language for image documents
    #[serde(default = "default_ocr_language")]
    pub ocr_language: String,
}

fn default_identifier_prefix() -> String {
    "Patient".to_string()
}

fn default_separator() -> String {
    "_".to_string()
}

fn default_ocr_language() -> String {
    "deu".to_string()
}

impl Default for PatientSettings {
    fn default() -> Self {
        Self {
            identifier_prefix: default_identifier_prefix(),
            separator: default_separator(),
            ocr_language: default_ocr_language(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-call timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_candidate_count")]
    pub candidate_count: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub num_ctx: Option<u32>,
    /// Ollama `keep_alive` sent with every call, e.g. "10m"
    #[serde(default)]
    pub keep_alive: Option<String>,
}

fn default_model_name() -> String {
    "gemma2:2b".to_string()
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_temperature() -> f32 {
    GenerationOptions::default().temperature
}

fn default_top_p() -> f32 {
    GenerationOptions::default().top_p
}

fn default_top_k() -> u32 {
    GenerationOptions::default().top_k
}

fn default_candidate_count() -> u32 {
    1
}

fn default_max_output_tokens() -> Option<u32> {
    GenerationOptions::default().max_output_tokens
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            candidate_count: default_candidate_count(),
            max_output_tokens: default_max_output_tokens(),
            num_ctx: None,
            keep_alive: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_output_path() -> PathBuf {
    PathBuf::from("ehr_extracted.csv")
}

fn default_delimiter() -> char {
    '|'
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            delimiter: default_delimiter(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Patients processed concurrently against the shared model
    #[serde(default = "default_patient_workers")]
    pub patient_workers: usize,
    /// Diagnostic dump root; `EHR_EXTRACT_DUMP_DIR` takes precedence
    #[serde(default)]
    pub dump_dir: Option<PathBuf>,
}

fn default_patient_workers() -> usize {
    1
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            patient_workers: default_patient_workers(),
            dump_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Append-mode log file in addition to stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Tracing filter directive, e.g. "ehr_extract=debug"
    #[serde(default)]
    pub filter: Option<String>,
}

impl Settings {
    /// Load settings from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Settings from `explicit` if given, else the first existing of
    /// `./ehr-extract.toml` and the per-user config file, else defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let candidates = std::iter::once(PathBuf::from(LOCAL_CONFIG_FILE)).chain(user_config_file());
        for candidate in candidates {
            if candidate.is_file() {
                tracing::debug!(path = %candidate.display(), "Using config file");
                return Self::load(&candidate);
            }
        }
        Ok(Self::default())
    }

    pub fn window_config(&self) -> Result<WindowConfig, ConfigError> {
        Ok(WindowConfig::new(
            self.windowing.chunk_size,
            self.windowing.overlap,
        )?)
    }

    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.model.temperature,
            top_p: self.model.top_p,
            top_k: self.model.top_k,
            candidate_count: self.model.candidate_count,
            max_output_tokens: self.model.max_output_tokens,
            num_ctx: self.model.num_ctx,
        }
    }

    /// Reject configurations that would fail mid-run. Checked before any
    /// document is read or any model is called.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window_config()?;

        if self.model.candidate_count != 1 {
            return Err(ConfigError::invalid(
                "model.candidate_count",
                format!("must be 1, got {}", self.model.candidate_count),
            ));
        }
        if self.model.timeout_secs == 0 {
            return Err(ConfigError::invalid("model.timeout_secs", "must be positive"));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::invalid(
                "model.temperature",
                format!("must be within 0.0..=2.0, got {}", self.model.temperature),
            ));
        }
        if !(0.0..=1.0).contains(&self.model.top_p) {
            return Err(ConfigError::invalid(
                "model.top_p",
                format!("must be within 0.0..=1.0, got {}", self.model.top_p),
            ));
        }
        validate_model_name(&self.model.name)
            .map_err(|e| ConfigError::invalid("model.name", e.to_string()))?;
        validate_base_url(&self.model.base_url)
            .map_err(|e| ConfigError::invalid("model.base_url", e.to_string()))?;

        if self.patients.identifier_prefix.trim().is_empty() {
            return Err(ConfigError::invalid(
                "patients.identifier_prefix",
                "must not be empty",
            ));
        }
        if self.patients.separator.is_empty() {
            return Err(ConfigError::invalid("patients.separator", "must not be empty"));
        }
        if self.pipeline.patient_workers == 0 {
            return Err(ConfigError::invalid(
                "pipeline.patient_workers",
                "must be at least 1",
            ));
        }

        let delimiter = self.output.delimiter;
        if !delimiter.is_ascii() || matches!(delimiter, '"' | '\n' | '\r') {
            return Err(ConfigError::invalid(
                "output.delimiter",
                format!("{delimiter:?} is not a usable single-byte delimiter"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.windowing.chunk_size, 5000);
        assert_eq!(settings.windowing.overlap, 100);
        assert_eq!(settings.patients.identifier_prefix, "Patient");
        assert_eq!(settings.model.name, "gemma2:2b");
        assert_eq!(settings.output.delimiter, '|');
        assert_eq!(settings.pipeline.patient_workers, 1);
    }

    #[test]
    fn generation_options_follow_model_section() {
        let options = Settings::default().generation_options();
        assert_eq!(options, GenerationOptions::default());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [windowing]
            chunk_size = 4000

            [model]
            name = "llama3.1:8b"
            num_ctx = 8192

            [output]
            delimiter = ";"
            "#,
        )
        .unwrap();
        assert_eq!(settings.windowing.chunk_size, 4000);
        assert_eq!(settings.windowing.overlap, 100);
        assert_eq!(settings.model.name, "llama3.1:8b");
        assert_eq!(settings.model.num_ctx, Some(8192));
        assert_eq!(settings.model.top_k, 32);
        assert_eq!(settings.output.delimiter, ';');
        assert_eq!(settings.patients.separator, "_");
    }

    #[test]
    fn load_reads_file_and_reports_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.toml");
        std::fs::write(&good, "[pipeline]\npatient_workers = 4\n").unwrap();
        assert_eq!(Settings::load(&good).unwrap().pipeline.patient_workers, 4);

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[pipeline\npatient_workers = ").unwrap();
        assert!(matches!(Settings::load(&bad), Err(ConfigError::Parse { .. })));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(Settings::load(&missing), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn discover_prefers_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "[windowing]\noverlap = 50\n").unwrap();
        assert_eq!(Settings::discover(Some(&path)).unwrap().windowing.overlap, 50);
    }

    #[test]
    fn overlap_not_below_chunk_size_is_rejected() {
        let mut settings = Settings::default();
        settings.windowing.overlap = 5000;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Window(WindowConfigError::OverlapTooLarge { .. }))
        ));
        settings.windowing.chunk_size = 0;
        settings.windowing.overlap = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Window(WindowConfigError::ZeroChunkSize))
        ));
    }

    #[test]
    fn invalid_fields_are_named() {
        let cases: Vec<(&str, Box<dyn Fn(&mut Settings)>)> = vec![
            ("model.candidate_count", Box::new(|s| s.model.candidate_count = 2)),
            ("model.timeout_secs", Box::new(|s| s.model.timeout_secs = 0)),
            ("model.top_p", Box::new(|s| s.model.top_p = 1.5)),
            ("model.name", Box::new(|s| s.model.name = "bad name;rm".into())),
            ("model.base_url", Box::new(|s| s.model.base_url = "http://example.com:11434".into())),
            ("patients.separator", Box::new(|s| s.patients.separator.clear())),
            ("pipeline.patient_workers", Box::new(|s| s.pipeline.patient_workers = 0)),
            ("output.delimiter", Box::new(|s| s.output.delimiter = '§')),
        ];
        for (expected, mutate) in cases {
            let mut settings = Settings::default();
            mutate(&mut settings);
            match settings.validate() {
                Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected),
                other => panic!("{expected}: expected Invalid, got {other:?}"),
            }
        }
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, env!("CARGO_PKG_VERSION"));
        assert_eq!(APP_NAME, "ehr-extract");
    }
}
