//! Run orchestrator: one call from an input directory to a results table.
//!
//! ```text
//! validate settings → acquire model → load patient documents
//!   → aggregate patients → write table → release model
//! ```
//!
//! Uses trait-based DI for the model client, so the whole run is testable
//! with a scripted [`LlmClient`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::config::{ConfigError, Settings};
use crate::pipeline::batch_extraction::{
    BatchReport, BatchStatusEvent, PatientBatchResult, PatientPipeline, ProgressFn,
};
use crate::pipeline::diagnostic::{dump_json, DiagnosticDump};
use crate::pipeline::export::{write_csv, ExportError, ResultTable};
use crate::pipeline::import::{
    load_patient_documents, DocumentError, PatientGrouping, ReaderRegistry,
};
use crate::pipeline::structuring::{InvocationError, LlmClient, ModelSession, OllamaClient};
use crate::pipeline::windowing::WindowConfig;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failures that end a run before any patient is processed, or while
/// writing its results. Per-window and per-patient failures never surface
/// here.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Document intake failed: {0}")]
    Documents(#[from] DocumentError),

    #[error("Model unavailable: {0}")]
    Model(#[from] InvocationError),

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub report: BatchReport,
    pub output_path: PathBuf,
    pub dump_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct ExtractionRun<'a> {
    settings: &'a Settings,
    client: Arc<dyn LlmClient>,
    registry: ReaderRegistry,
}

impl<'a> ExtractionRun<'a> {
    pub fn new(settings: &'a Settings, client: Arc<dyn LlmClient>) -> Self {
        Self {
            settings,
            client,
            registry: ReaderRegistry::standard(&settings.patients.ocr_language),
        }
    }

    pub fn with_registry(mut self, registry: ReaderRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Process every patient under `input_dir` and write the results table.
    ///
    /// Succeeds even when some (or all) patients fail; their failures are in
    /// the returned report.
    pub fn run(&self, input_dir: &Path) -> Result<RunSummary, ProcessingError> {
        let settings = self.settings;
        settings.validate()?;
        let window = settings.window_config()?;

        let session = ModelSession::acquire(
            Arc::clone(&self.client),
            &settings.model.name,
            settings.generation_options(),
        )?;

        let outcome = self.run_with_session(&session, window, input_dir);
        session.finish();
        outcome
    }

    fn run_with_session(
        &self,
        session: &ModelSession,
        window: WindowConfig,
        input_dir: &Path,
    ) -> Result<RunSummary, ProcessingError> {
        let settings = self.settings;
        let grouping = PatientGrouping::new(
            settings.patients.identifier_prefix.clone(),
            settings.patients.separator.clone(),
        );
        let documents = load_patient_documents(input_dir, &grouping, &self.registry)?;

        let dump = DiagnosticDump::resolve(settings.pipeline.dump_dir.as_deref());
        if let Some(dump) = &dump {
            dump_json(dump.run_dir(), "00-settings.json", settings);
        }

        tracing::info!(
            patients = documents.len(),
            model = %session.model(),
            temperature = session.options().temperature,
            chunk_size = window.chunk_size(),
            overlap = window.overlap(),
            workers = settings.pipeline.patient_workers,
            "Extraction starting"
        );

        let pipeline = PatientPipeline::new(session, window).with_dump(dump.as_ref());
        let progress: ProgressFn<'_> = &log_progress;
        let result = pipeline.aggregate(&documents, settings.pipeline.patient_workers, Some(progress));

        let table = ResultTable::from_records(result.records());
        write_csv(&table, &settings.output.path, settings.output.delimiter)?;

        let report = result.report();
        log_report(&result, &report);
        Ok(RunSummary {
            report,
            output_path: settings.output.path.clone(),
            dump_dir: dump.map(|d| d.run_dir().to_path_buf()),
        })
    }
}

/// Run against the Ollama server named in `settings`.
pub fn run_pipeline(settings: &Settings, input_dir: &Path) -> Result<RunSummary, ProcessingError> {
    let client = OllamaClient::new(&settings.model.base_url, settings.model.timeout_secs)?
        .with_keep_alive(settings.model.keep_alive.clone());
    ExtractionRun::new(settings, Arc::new(client)).run(input_dir)
}

fn log_progress(event: BatchStatusEvent) {
    match event {
        BatchStatusEvent::Started { patient_count } => {
            tracing::info!(patients = patient_count, "Batch started");
        }
        BatchStatusEvent::PatientStarted {
            patient,
            window_count,
        } => {
            tracing::info!(patient = %patient, windows = window_count, "Patient started");
        }
        BatchStatusEvent::PatientFinished {
            patient,
            parsed,
            completed,
            total,
        } => {
            tracing::info!(patient = %patient, parsed, completed, total, "Patient finished");
        }
        BatchStatusEvent::Completed {
            parsed,
            failed,
            duration_ms,
        } => {
            tracing::info!(parsed, failed, duration_ms, "Batch completed");
        }
    }
}

fn log_report(result: &PatientBatchResult, report: &BatchReport) {
    for (patient, failure) in result.failures() {
        tracing::warn!(
            patient = %patient,
            stage = %failure.stage,
            detail = %failure.detail,
            "Patient excluded from results"
        );
    }
    tracing::info!(
        total = report.patients_total,
        parsed = report.patients_parsed,
        failed = report.patients_failed,
        windows_failed = report.windows_failed,
        duration_ms = report.duration_ms,
        "Extraction finished"
    );
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::pipeline::batch_extraction::PatientStage;
    use crate::pipeline::structuring::{GenerationOptions, MockLlmClient};

    /// Window prompts get a partial dict; summary prompts get a fenced
    /// record whose age depends on the patient's text. Counts releases.
    struct ClinicLlm {
        released: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl ClinicLlm {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                released: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    impl LlmClient for ClinicLlm {
        fn generate(
            &self,
            _model: &str,
            prompt: &str,
            _system: &str,
            _options: &GenerationOptions,
        ) -> Result<String, InvocationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if prompt.contains("PARTIAL EXTRACTIONS") {
                if prompt.contains("unparsable") {
                    return Ok("I could not find anything useful.".into());
                }
                let age = if prompt.contains("61") { "61" } else { "44" };
                return Ok(format!(
                    "Here is the result:\n```python\n{{'age': '{age}', 'gender': 'N/A'}}\n```"
                ));
            }
            if prompt.contains("Rauschen") {
                return Ok("unparsable".into());
            }
            Ok(if prompt.contains("61") {
                "{'age': '61'}".into()
            } else {
                "{'age': '44'}".into()
            })
        }

        fn is_model_available(&self, model: &str) -> Result<bool, InvocationError> {
            Ok(model == "gemma2:2b")
        }

        fn list_models(&self) -> Result<Vec<String>, InvocationError> {
            Ok(vec!["gemma2:2b".into()])
        }

        fn release(&self, _model: &str) -> Result<(), InvocationError> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn settings_for(out_dir: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.output.path = out_dir.join("ehr_extracted.csv");
        settings
    }

    #[test]
    fn full_run_writes_one_row_per_parsed_patient() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("Patient-001_brief.txt"), "Alter 44 Jahre").unwrap();
        std::fs::write(input.path().join("Patient-002_brief.txt"), "Alter 61 Jahre").unwrap();
        std::fs::write(input.path().join("Patient-003_brief.txt"), "Rauschen").unwrap();
        std::fs::write(input.path().join("index.txt"), "ignored").unwrap();

        let settings = settings_for(out.path());
        let llm = ClinicLlm::new();
        let summary = ExtractionRun::new(&settings, llm.clone())
            .run(input.path())
            .unwrap();

        assert_eq!(summary.report.patients_total, 3);
        assert_eq!(summary.report.patients_parsed, 2);
        assert_eq!(summary.report.failures_by_stage[&PatientStage::Parsing], 1);
        assert_eq!(llm.released.load(Ordering::SeqCst), 1);

        let csv = std::fs::read_to_string(&summary.output_path).unwrap();
        assert_eq!(
            csv,
            "Patient|age|gender\nPatient-001|44|N/A\nPatient-002|61|N/A\n"
        );
    }

    #[test]
    fn missing_model_is_fatal_before_intake() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let mut settings = settings_for(out.path());
        settings.model.name = "llama3.1:8b".into();

        let err = ExtractionRun::new(&settings, ClinicLlm::new())
            .run(input.path())
            .unwrap_err();

        assert!(matches!(err, ProcessingError::Model(InvocationError::ModelNotFound(_))));
        assert!(!settings.output.path.exists());
    }

    #[test]
    fn invalid_settings_fail_before_model_call() {
        let out = tempfile::tempdir().unwrap();
        let mut settings = settings_for(out.path());
        settings.windowing.overlap = settings.windowing.chunk_size;
        let llm = ClinicLlm::new();

        let err = ExtractionRun::new(&settings, llm.clone())
            .run(Path::new("."))
            .unwrap_err();

        assert!(matches!(err, ProcessingError::Config(ConfigError::Window(_))));
        assert!(llm.prompts.lock().unwrap().is_empty());
        assert_eq!(llm.released.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_input_dir_still_releases_model() {
        let out = tempfile::tempdir().unwrap();
        let settings = settings_for(out.path());
        let llm = ClinicLlm::new();

        let err = ExtractionRun::new(&settings, llm.clone())
            .run(&out.path().join("absent"))
            .unwrap_err();

        assert!(matches!(
            err,
            ProcessingError::Documents(DocumentError::MissingDirectory(_))
        ));
        assert_eq!(llm.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_input_writes_header_only() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let settings = settings_for(out.path());

        let summary = ExtractionRun::new(&settings, Arc::new(MockLlmClient::new("{}")))
            .run(input.path())
            .unwrap();

        assert_eq!(summary.report.patients_total, 0);
        assert_eq!(std::fs::read_to_string(&summary.output_path).unwrap(), "Patient\n");
    }

    #[test]
    fn dump_dir_receives_settings_and_patient_files() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("Patient-001_brief.txt"), "Alter 44 Jahre").unwrap();
        let mut settings = settings_for(out.path());
        settings.pipeline.dump_dir = Some(out.path().join("dump"));
        settings.pipeline.patient_workers = 2;

        let summary = ExtractionRun::new(&settings, ClinicLlm::new())
            .run(input.path())
            .unwrap();

        let run_dir = summary.dump_dir.unwrap();
        assert!(run_dir.join("00-settings.json").exists());
        assert!(run_dir.join("Patient-001").join("03-record.json").exists());
    }

    #[test]
    fn non_local_endpoint_is_rejected() {
        let out = tempfile::tempdir().unwrap();
        let mut settings = settings_for(out.path());
        settings.model.base_url = "http://10.0.0.5:11434".into();
        let err = run_pipeline(&settings, out.path()).unwrap_err();
        assert!(matches!(err, ProcessingError::Model(InvocationError::NonLocalEndpoint(_))));
    }
}
