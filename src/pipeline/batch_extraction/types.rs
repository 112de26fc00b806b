//! Core types for per-patient extraction.
//!
//! These types model the full lifecycle:
//! Document → Windows → Partial extractions → Summary → Record | Failure.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::pipeline::structuring::{InvocationError, ParseStrategy, StructuredRecord};

// ═══════════════════════════════════════════
// Patient input
// ═══════════════════════════════════════════

/// Opaque patient identifier, derived from a filename prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(String);

impl PatientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PatientId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PatientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// All text for one patient, ready for windowing.
#[derive(Debug, Clone)]
pub struct PatientDocument {
    pub patient: PatientId,
    pub text: String,
    /// Files that contributed text, in the order they were joined.
    pub sources: Vec<PathBuf>,
}

impl PatientDocument {
    pub fn new(patient: impl Into<PatientId>, text: impl Into<String>) -> Self {
        Self {
            patient: patient.into(),
            text: text.into(),
            sources: Vec::new(),
        }
    }
}

// ═══════════════════════════════════════════
// Window-level results
// ═══════════════════════════════════════════

/// Raw model response for one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialExtraction {
    pub window_index: usize,
    pub response: String,
}

/// What happened to one window. A failed window is skipped; its siblings
/// still run.
#[derive(Debug)]
pub enum WindowOutcome {
    Extracted(PartialExtraction),
    Failed {
        window_index: usize,
        error: InvocationError,
    },
}

impl WindowOutcome {
    pub fn window_index(&self) -> usize {
        match self {
            Self::Extracted(partial) => partial.window_index,
            Self::Failed { window_index, .. } => *window_index,
        }
    }

    pub fn is_extracted(&self) -> bool {
        matches!(self, Self::Extracted(_))
    }
}

/// Survivors in document order, and the failure count.
pub fn split_window_outcomes(outcomes: Vec<WindowOutcome>) -> (Vec<PartialExtraction>, usize) {
    let mut partials = Vec::with_capacity(outcomes.len());
    let mut failed = 0;
    for outcome in outcomes {
        match outcome {
            WindowOutcome::Extracted(partial) => partials.push(partial),
            WindowOutcome::Failed { .. } => failed += 1,
        }
    }
    partials.sort_by_key(|p| p.window_index);
    (partials, failed)
}

// ═══════════════════════════════════════════
// Patient-level results
// ═══════════════════════════════════════════

/// Pipeline stage at which a patient was excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatientStage {
    /// The document produced no windows (no text).
    Windowing,
    /// Every window invocation failed.
    Extraction,
    /// The consolidation call failed.
    Reduction,
    /// No parse strategy recovered a record.
    Parsing,
}

impl PatientStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windowing => "windowing",
            Self::Extraction => "extraction",
            Self::Reduction => "reduction",
            Self::Parsing => "parsing",
        }
    }
}

impl fmt::Display for PatientStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a patient has no row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatientFailure {
    pub stage: PatientStage,
    pub detail: String,
    /// The summary text that failed to parse, kept for audit.
    pub raw_response: Option<String>,
    /// Windows skipped before the patient was excluded.
    pub windows_failed: usize,
}

impl PatientFailure {
    pub fn new(stage: PatientStage, detail: impl Into<String>) -> Self {
        Self {
            stage,
            detail: detail.into(),
            raw_response: None,
            windows_failed: 0,
        }
    }

    pub fn with_windows_failed(mut self, windows_failed: usize) -> Self {
        self.windows_failed = windows_failed;
        self
    }

    pub fn with_raw_response(mut self, raw: impl Into<String>) -> Self {
        self.raw_response = Some(raw.into());
        self
    }
}

impl fmt::Display for PatientFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.detail)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatientOutcome {
    Parsed {
        patient: PatientId,
        record: StructuredRecord,
        strategy: ParseStrategy,
        windows_failed: usize,
    },
    Failed {
        patient: PatientId,
        failure: PatientFailure,
    },
}

impl PatientOutcome {
    pub fn patient(&self) -> &PatientId {
        match self {
            Self::Parsed { patient, .. } | Self::Failed { patient, .. } => patient,
        }
    }

    pub fn record(&self) -> Option<&StructuredRecord> {
        match self {
            Self::Parsed { record, .. } => Some(record),
            Self::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&PatientFailure> {
        match self {
            Self::Parsed { .. } => None,
            Self::Failed { failure, .. } => Some(failure),
        }
    }
}

/// Outcome of every patient in a batch, in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientBatchResult {
    pub outcomes: Vec<PatientOutcome>,
    pub duration_ms: u64,
}

impl PatientBatchResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Successfully parsed records, each tagged with its patient id.
    pub fn records(&self) -> impl Iterator<Item = &StructuredRecord> {
        self.outcomes.iter().filter_map(PatientOutcome::record)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&PatientId, &PatientFailure)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.failure().map(|f| (o.patient(), f)))
    }

    pub fn parsed_count(&self) -> usize {
        self.records().count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.parsed_count()
    }

    pub fn report(&self) -> BatchReport {
        let mut failures_by_stage = BTreeMap::new();
        for (_, failure) in self.failures() {
            *failures_by_stage.entry(failure.stage).or_insert(0) += 1;
        }
        let windows_failed = self
            .outcomes
            .iter()
            .map(|o| match o {
                PatientOutcome::Parsed { windows_failed, .. } => *windows_failed,
                PatientOutcome::Failed { failure, .. } => failure.windows_failed,
            })
            .sum();
        BatchReport {
            patients_total: self.outcomes.len(),
            patients_parsed: self.parsed_count(),
            patients_failed: self.failed_count(),
            failures_by_stage,
            windows_failed,
            duration_ms: self.duration_ms,
        }
    }
}

/// Run summary, logged at the end and returned to the binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub patients_total: usize,
    pub patients_parsed: usize,
    pub patients_failed: usize,
    pub failures_by_stage: BTreeMap<PatientStage, usize>,
    /// Skipped windows across every patient, parsed or excluded.
    pub windows_failed: usize,
    pub duration_ms: u64,
}

// ═══════════════════════════════════════════
// Batch Status Events
// ═══════════════════════════════════════════

/// Progress notifications emitted while a batch runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum BatchStatusEvent {
    Started {
        patient_count: usize,
    },
    PatientStarted {
        patient: PatientId,
        window_count: usize,
    },
    PatientFinished {
        patient: PatientId,
        parsed: bool,
        completed: usize,
        total: usize,
    },
    Completed {
        parsed: usize,
        failed: usize,
        duration_ms: u64,
    },
}
