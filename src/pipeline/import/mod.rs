//! Document intake: format detection, text readers, and patient grouping.
//!
//! ```text
//! input dir → detect_format → DocumentReader → clean text → PatientDocument
//! ```

pub mod format;
pub mod readers;
pub mod grouping;

pub use format::*;
pub use readers::*;
pub use grouping::*;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No reader handles this file; the document is skipped.
    #[error("Unsupported document type: {0}")]
    UnsupportedType(String),

    #[error("File too large: {size_mb:.1}MB exceeds {max_mb}MB limit")]
    FileTooLarge { size_mb: f64, max_mb: u64 },

    #[error("PDF is password-protected")]
    EncryptedPdf,

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error("DOCX error: {0}")]
    Docx(String),

    #[error("OCR error: {0}")]
    Ocr(String),

    #[error("No text could be read from the document")]
    EmptyText,

    #[error("Input directory not found: {0}")]
    MissingDirectory(PathBuf),
}
