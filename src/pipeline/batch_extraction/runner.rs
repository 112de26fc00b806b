//! PatientPipeline: orchestrates extraction for every patient.
//!
//! Per patient: Windower → Invoker → Reducer → Parser. Every failure stops at
//! the patient boundary and becomes a `PatientOutcome::Failed`; the batch
//! always runs to the end.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use serde_json::Value;

use crate::pipeline::diagnostic::{dump_json, DiagnosticDump};
use crate::pipeline::structuring::{parse_structured_record, ModelSession, PATIENT_KEY};
use crate::pipeline::windowing::WindowConfig;

use super::invoker::ExtractionInvoker;
use super::reducer::Reducer;
use super::types::*;

/// Progress callback, shared by all patient workers.
pub type ProgressFn<'a> = &'a (dyn Fn(BatchStatusEvent) + Sync);

pub struct PatientPipeline<'a> {
    invoker: ExtractionInvoker<'a>,
    reducer: Reducer<'a>,
    window: WindowConfig,
    dump: Option<&'a DiagnosticDump>,
}

impl<'a> PatientPipeline<'a> {
    pub fn new(session: &'a ModelSession, window: WindowConfig) -> Self {
        Self {
            invoker: ExtractionInvoker::new(session),
            reducer: Reducer::new(session),
            window,
            dump: None,
        }
    }

    pub fn with_dump(mut self, dump: Option<&'a DiagnosticDump>) -> Self {
        self.dump = dump;
        self
    }

    /// Run one patient end to end. Never panics on model or parse failures.
    pub fn process_patient(&self, document: &PatientDocument) -> PatientOutcome {
        let patient = &document.patient;
        let dump_dir = self.dump.and_then(|d| d.patient_dir(patient.as_str()));
        let dump_dir = dump_dir.as_deref();

        let windows = self.window.windows(&document.text);
        let window_count = windows.len();
        if window_count == 0 {
            return self.fail(
                patient,
                PatientFailure::new(PatientStage::Windowing, "document contains no text"),
                dump_dir,
            );
        }

        tracing::info!(
            patient = %patient,
            chars = document.text.chars().count(),
            windows = window_count,
            "Extracting patient"
        );

        let outcomes = self.invoker.extract_all(patient, windows, dump_dir);
        let (partials, windows_failed) = split_window_outcomes(outcomes);
        if partials.is_empty() {
            return self.fail(
                patient,
                PatientFailure::new(
                    PatientStage::Extraction,
                    format!("all {window_count} windows failed"),
                )
                .with_windows_failed(windows_failed),
                dump_dir,
            );
        }
        if windows_failed > 0 {
            tracing::warn!(
                patient = %patient,
                failed = windows_failed,
                survived = partials.len(),
                "Reducing over surviving windows only"
            );
        }

        let summary = match self.reducer.reduce(&partials, dump_dir) {
            Ok(summary) => summary,
            Err(e) => {
                return self.fail(
                    patient,
                    PatientFailure::new(PatientStage::Reduction, e.to_string())
                        .with_windows_failed(windows_failed),
                    dump_dir,
                )
            }
        };

        match parse_structured_record(&summary) {
            Ok(parsed) => {
                let mut record = parsed.record;
                let tag = Value::String(patient.as_str().to_string());
                if let Some(previous) = record.insert(PATIENT_KEY, tag) {
                    tracing::warn!(
                        patient = %patient,
                        model_value = %previous,
                        "Model wrote its own '{PATIENT_KEY}' value, replaced with patient id"
                    );
                }
                tracing::info!(
                    patient = %patient,
                    strategy = %parsed.strategy,
                    attributes = record.len() - 1,
                    "Patient record parsed"
                );
                if let Some(dir) = dump_dir {
                    dump_json(dir, "03-record.json", &record);
                }
                PatientOutcome::Parsed {
                    patient: patient.clone(),
                    record,
                    strategy: parsed.strategy,
                    windows_failed,
                }
            }
            Err(e) => {
                tracing::warn!(
                    patient = %patient,
                    raw_response = %summary,
                    "Could not parse summary for patient; raw response follows"
                );
                self.fail(
                    patient,
                    PatientFailure::new(PatientStage::Parsing, e.to_string())
                        .with_raw_response(summary)
                        .with_windows_failed(windows_failed),
                    dump_dir,
                )
            }
        }
    }

    fn fail(
        &self,
        patient: &PatientId,
        failure: PatientFailure,
        dump_dir: Option<&Path>,
    ) -> PatientOutcome {
        tracing::warn!(
            patient = %patient,
            stage = %failure.stage,
            detail = %failure.detail,
            "Patient excluded from results"
        );
        if let Some(dir) = dump_dir {
            dump_json(dir, "03-failure.json", &failure);
        }
        PatientOutcome::Failed {
            patient: patient.clone(),
            failure,
        }
    }

    /// Process every patient with up to `workers` patients in flight.
    ///
    /// Outcomes are returned in input order regardless of completion order.
    /// Windows inside one patient always run sequentially.
    pub fn aggregate(
        &self,
        documents: &[PatientDocument],
        workers: usize,
        progress: Option<ProgressFn<'_>>,
    ) -> PatientBatchResult {
        let start = Instant::now();
        let total = documents.len();
        if total == 0 {
            return PatientBatchResult::empty();
        }

        let emit = |event: BatchStatusEvent| {
            if let Some(progress) = progress {
                progress(event);
            }
        };
        emit(BatchStatusEvent::Started {
            patient_count: total,
        });

        let completed = AtomicUsize::new(0);
        let run_one = |document: &PatientDocument| {
            emit(BatchStatusEvent::PatientStarted {
                patient: document.patient.clone(),
                window_count: self.window.window_count(document.text.chars().count()),
            });
            let outcome = self.process_patient(document);
            emit(BatchStatusEvent::PatientFinished {
                patient: document.patient.clone(),
                parsed: outcome.record().is_some(),
                completed: completed.fetch_add(1, Ordering::SeqCst) + 1,
                total,
            });
            outcome
        };

        let workers = workers.clamp(1, total);
        let outcomes: Vec<PatientOutcome> = if workers == 1 {
            documents.iter().map(&run_one).collect()
        } else {
            match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => pool.install(|| documents.par_iter().map(&run_one).collect()),
                Err(e) => {
                    tracing::warn!(
                        workers,
                        error = %e,
                        "Failed to build patient worker pool, processing sequentially"
                    );
                    documents.iter().map(&run_one).collect()
                }
            }
        };

        let result = PatientBatchResult {
            outcomes,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        emit(BatchStatusEvent::Completed {
            parsed: result.parsed_count(),
            failed: result.failed_count(),
            duration_ms: result.duration_ms,
        });
        result
    }
}
