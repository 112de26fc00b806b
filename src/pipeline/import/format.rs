use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::DocumentError;

/// Broad file categories we handle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Pdf,
    Docx,
    Image,
    PlainText,
    Unsupported,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Image => "image",
            Self::PlainText => "plain_text",
            Self::Unsupported => "unsupported",
        }
    }

    pub fn needs_ocr(&self) -> bool {
        matches!(self, Self::Image)
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

/// Result of format detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatDetection {
    pub mime_type: String,
    pub category: FileCategory,
    pub file_size_bytes: u64,
}

pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024; // 100MB

const DOCX_MAIN_PART: &str = "word/document.xml";

/// Detect file format from magic bytes, never from the extension.
pub fn detect_format(path: &Path) -> Result<FormatDetection, DocumentError> {
    let file_size = std::fs::metadata(path)?.len();
    if file_size > MAX_FILE_SIZE {
        return Err(DocumentError::FileTooLarge {
            size_mb: file_size as f64 / (1024.0 * 1024.0),
            max_mb: MAX_FILE_SIZE / (1024 * 1024),
        });
    }

    let mut file = File::open(path)?;
    let mut header = [0u8; 16];
    let bytes_read = file.read(&mut header)?;

    let (mime_type, category) = match &header[..bytes_read.min(8)] {
        // %PDF
        [0x25, 0x50, 0x44, 0x46, ..] => ("application/pdf", FileCategory::Pdf),
        // PK\x03\x04: any zip; only Word documents are readable
        [0x50, 0x4B, 0x03, 0x04, ..] => {
            if is_docx_archive(path) {
                (
                    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                    FileCategory::Docx,
                )
            } else {
                ("application/zip", FileCategory::Unsupported)
            }
        }
        [0xFF, 0xD8, 0xFF, ..] => ("image/jpeg", FileCategory::Image),
        [0x89, 0x50, 0x4E, 0x47, ..] => ("image/png", FileCategory::Image),
        // TIFF: little-endian (49 49 2A 00) or big-endian (4D 4D 00 2A)
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => {
            ("image/tiff", FileCategory::Image)
        }
        _ => {
            if is_likely_text(path)? {
                ("text/plain", FileCategory::PlainText)
            } else {
                ("application/octet-stream", FileCategory::Unsupported)
            }
        }
    };

    Ok(FormatDetection {
        mime_type: mime_type.to_string(),
        category,
        file_size_bytes: file_size,
    })
}

fn is_docx_archive(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    match zip::ZipArchive::new(file) {
        Ok(mut archive) => archive.by_name(DOCX_MAIN_PART).is_ok(),
        Err(_) => false,
    }
}

/// Check if a file is likely plain text (valid UTF-8, mostly printable)
fn is_likely_text(path: &Path) -> Result<bool, DocumentError> {
    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; 4096];
    let n = file.read(&mut buffer)?;
    buffer.truncate(n);

    if n == 0 {
        return Ok(false);
    }

    let text = match std::str::from_utf8(&buffer) {
        Ok(t) => t,
        // A multi-byte character cut by the sample boundary is still text.
        Err(e) if e.error_len().is_none() => {
            std::str::from_utf8(&buffer[..e.valid_up_to()]).unwrap_or_default()
        }
        Err(_) => return Ok(false),
    };

    let total = text.chars().count();
    if total == 0 {
        return Ok(false);
    }
    // At least 80% printable characters (or whitespace)
    let printable = text
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .count();
    Ok(printable as f64 / total as f64 > 0.80)
}
