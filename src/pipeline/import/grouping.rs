//! Patient grouping by filename convention: `<PatientIdentifier>-<n>_<rest>`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::readers::ReaderRegistry;
use super::DocumentError;
use crate::pipeline::batch_extraction::{PatientDocument, PatientId};

/// Separator placed between the texts of two files of the same patient.
pub const DOCUMENT_JOINER: &str = "\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientGrouping {
    /// Substring the filename prefix must contain, compared case-insensitively.
    pub identifier: String,
    pub separator: String,
}

impl PatientGrouping {
    pub fn new(identifier: impl Into<String>, separator: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            separator: separator.into(),
        }
    }

    pub fn patient_id_for(&self, filename: &str) -> Option<PatientId> {
        patient_id_for(filename, &self.identifier, &self.separator)
    }
}

impl Default for PatientGrouping {
    fn default() -> Self {
        Self::new("Patient", "_")
    }
}

/// The patient a file belongs to: the filename prefix before the first
/// `separator`, if that prefix contains `identifier`.
pub fn patient_id_for(filename: &str, identifier: &str, separator: &str) -> Option<PatientId> {
    if separator.is_empty() {
        return None;
    }
    let (prefix, _) = filename.split_once(separator)?;
    if prefix.is_empty() || !prefix.to_lowercase().contains(&identifier.to_lowercase()) {
        return None;
    }
    Some(PatientId::new(prefix))
}

/// Read every patient file under `dir` into one document per patient.
///
/// Files are visited in filename order. A document that cannot be read is
/// logged and skipped; the patient's other documents still contribute. A
/// patient whose every document failed is kept with empty text so it is
/// accounted for downstream. Patients are returned ordered by id.
pub fn load_patient_documents(
    dir: &Path,
    grouping: &PatientGrouping,
    registry: &ReaderRegistry,
) -> Result<Vec<PatientDocument>, DocumentError> {
    if !dir.is_dir() {
        return Err(DocumentError::MissingDirectory(dir.to_path_buf()));
    }

    let mut files: Vec<(String, PathBuf)> = Vec::new();
    let mut skipped = 0usize;
    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory entry");
                skipped += 1;
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        // Follows symlinks; a dangling link is skipped like any unreadable file.
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => files.push((name, path)),
            Ok(_) => {}
            Err(e) => {
                warn!(file = %name, error = %e, "Skipping unreadable directory entry");
                skipped += 1;
            }
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut patients: BTreeMap<PatientId, (Vec<String>, Vec<PathBuf>)> = BTreeMap::new();
    let mut unmatched = 0usize;

    for (name, path) in files {
        let Some(patient) = grouping.patient_id_for(&name) else {
            debug!(file = %name, "No patient identifier in filename, ignoring");
            unmatched += 1;
            continue;
        };
        let slot = patients.entry(patient.clone()).or_default();

        match registry.read(&path) {
            Ok(text) => {
                slot.0.push(text);
                slot.1.push(path);
            }
            Err(e) => {
                warn!(patient = %patient, file = %name, error = %e, "Skipping document");
                skipped += 1;
            }
        }
    }

    let documents: Vec<PatientDocument> = patients
        .into_iter()
        .map(|(patient, (texts, sources))| {
            if texts.is_empty() {
                warn!(patient = %patient, "No readable documents for patient");
            }
            PatientDocument {
                patient,
                text: texts.join(DOCUMENT_JOINER),
                sources,
            }
        })
        .collect();

    info!(
        dir = %dir.display(),
        patients = documents.len(),
        documents_skipped = skipped,
        files_ignored = unmatched,
        "Patient documents loaded"
    );
    Ok(documents)
}
