//! Text readers, one per supported document format.
//!
//! Readers return raw text. The registry owns format dispatch and the
//! cleaning applied to every document before it reaches a patient.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Command;

use pdfium_render::prelude::*;
use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use tracing::{debug, warn};

use super::format::{detect_format, FileCategory};
use super::DocumentError;
use crate::pipeline::structuring::clean_document_text;

pub const DEFAULT_OCR_LANGUAGE: &str = "deu";

pub trait DocumentReader: Send + Sync {
    fn name(&self) -> &'static str;

    fn handles(&self, category: FileCategory) -> bool;

    fn read_text(&self, path: &Path) -> Result<String, DocumentError>;
}

// ═══════════════════════════════════════════
// Plain text
// ═══════════════════════════════════════════

pub struct PlainTextReader;

impl DocumentReader for PlainTextReader {
    fn name(&self) -> &'static str {
        "plain_text"
    }

    fn handles(&self, category: FileCategory) -> bool {
        category == FileCategory::PlainText
    }

    fn read_text(&self, path: &Path) -> Result<String, DocumentError> {
        let bytes = std::fs::read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

// ═══════════════════════════════════════════
// PDF (PDFium text layer)
// ═══════════════════════════════════════════

/// Reads the embedded text layer of a PDF, page by page.
///
/// A fresh `Pdfium` handle is bound per document because the upstream type
/// is `!Send`. Scanned PDFs without a text layer come back empty.
pub struct PdfReader;

impl DocumentReader for PdfReader {
    fn name(&self) -> &'static str {
        "pdfium"
    }

    fn handles(&self, category: FileCategory) -> bool {
        category == FileCategory::Pdf
    }

    fn read_text(&self, path: &Path) -> Result<String, DocumentError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| classify_load_failure(e.to_string()))?;

        let mut pages = Vec::new();
        for (idx, page) in document.pages().iter().enumerate() {
            let text = page
                .text()
                .map_err(|e| DocumentError::Pdf(format!("page {}: {e}", idx + 1)))?
                .all();
            pages.push(text);
        }
        debug!(file = %path.display(), pages = pages.len(), "PDF text layer read");
        Ok(pages.join("\n"))
    }
}

/// Load the PDFium dynamic library.
///
/// Discovery order:
/// 1. `PDFIUM_DYNAMIC_LIB_PATH` env var (explicit path)
/// 2. Alongside the running executable, or its `../lib`
/// 3. System library search paths
fn load_pdfium() -> Result<Pdfium, DocumentError> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        debug!(path = %path, "Loading PDFium from env var");
        let bindings = Pdfium::bind_to_library(&path)
            .map_err(|e| DocumentError::Pdf(format!("Failed to load PDFium from {path}: {e}")))?;
        return Ok(Pdfium::new(bindings));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let candidates = [exe_dir.to_path_buf(), exe_dir.join("..").join("lib")];
            for dir in &candidates {
                let lib_path =
                    Pdfium::pdfium_platform_library_name_at_path(dir.to_string_lossy().as_ref());
                if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                    debug!(dir = %dir.display(), "Loaded PDFium from candidate directory");
                    return Ok(Pdfium::new(bindings));
                }
            }
        }
    }

    let bindings = Pdfium::bind_to_system_library().map_err(|e| {
        DocumentError::Pdf(format!(
            "PDFium library not found. Set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}"
        ))
    })?;
    Ok(Pdfium::new(bindings))
}

fn classify_load_failure(message: String) -> DocumentError {
    let lower = message.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        DocumentError::EncryptedPdf
    } else {
        DocumentError::Pdf(format!("Failed to load PDF: {message}"))
    }
}

// ═══════════════════════════════════════════
// DOCX (WordprocessingML)
// ═══════════════════════════════════════════

/// Reads paragraph text from `word/document.xml`, one line per paragraph.
pub struct DocxReader;

impl DocumentReader for DocxReader {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn handles(&self, category: FileCategory) -> bool {
        category == FileCategory::Docx
    }

    fn read_text(&self, path: &Path) -> Result<String, DocumentError> {
        let file = std::fs::File::open(path)?;
        let mut archive =
            zip::ZipArchive::new(file).map_err(|e| DocumentError::Docx(e.to_string()))?;
        let part = archive
            .by_name("word/document.xml")
            .map_err(|e| DocumentError::Docx(format!("word/document.xml: {e}")))?;

        let paragraphs = docx_paragraphs(BufReader::new(part))?;
        debug!(file = %path.display(), paragraphs = paragraphs.len(), "DOCX text read");
        Ok(paragraphs.join("\n"))
    }
}

/// Walk WordprocessingML events and collect the text of every paragraph.
///
/// Paragraphs nested in text boxes are emitted as their own lines when they
/// close; the enclosing paragraph keeps collecting text after them.
/// `mc:Fallback` duplicates of text boxes are skipped.
fn docx_paragraphs<R: BufRead>(source: R) -> Result<Vec<String>, DocumentError> {
    let mut reader = XmlReader::from_reader(source);
    let mut buf = Vec::new();

    let mut paragraphs = Vec::new();
    let mut open: Vec<String> = Vec::new();
    let mut run_depth = 0usize;
    let mut fallback_depth = 0usize;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"mc:Fallback" => fallback_depth += 1,
                _ if fallback_depth > 0 => {}
                b"w:p" => open.push(String::new()),
                b"w:r" => run_depth += 1,
                b"w:t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) if fallback_depth == 0 && run_depth > 0 => {
                let control = match e.name().as_ref() {
                    b"w:tab" => Some('\t'),
                    b"w:br" | b"w:cr" => Some('\n'),
                    _ => None,
                };
                if let (Some(c), Some(paragraph)) = (control, open.last_mut()) {
                    paragraph.push(c);
                }
            }
            Ok(Event::Text(e)) if in_text && fallback_depth == 0 => {
                let text = e.unescape().map_err(|e| DocumentError::Docx(e.to_string()))?;
                if let Some(paragraph) = open.last_mut() {
                    paragraph.push_str(&text);
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"mc:Fallback" => fallback_depth = fallback_depth.saturating_sub(1),
                _ if fallback_depth > 0 => {}
                b"w:p" => {
                    if let Some(paragraph) = open.pop() {
                        paragraphs.push(paragraph);
                    }
                }
                b"w:r" => run_depth = run_depth.saturating_sub(1),
                b"w:t" => in_text = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(DocumentError::Docx(format!(
                    "malformed XML at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs)
}

// ═══════════════════════════════════════════
// Images (Tesseract CLI)
// ═══════════════════════════════════════════

/// OCR through the `tesseract` command-line tool.
pub struct TesseractReader {
    binary: PathBuf,
    language: String,
}

impl TesseractReader {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            language: language.into(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

impl Default for TesseractReader {
    fn default() -> Self {
        Self::new(DEFAULT_OCR_LANGUAGE)
    }
}

impl DocumentReader for TesseractReader {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn handles(&self, category: FileCategory) -> bool {
        category.needs_ocr()
    }

    fn read_text(&self, path: &Path) -> Result<String, DocumentError> {
        let output = Command::new(&self.binary)
            .arg(path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output()
            .map_err(|e| {
                DocumentError::Ocr(format!("failed to run {}: {e}", self.binary.display()))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DocumentError::Ocr(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

// ═══════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════

/// Dispatches each file to the first registered reader for its format.
pub struct ReaderRegistry {
    readers: Vec<Box<dyn DocumentReader>>,
}

impl ReaderRegistry {
    pub fn empty() -> Self {
        Self {
            readers: Vec::new(),
        }
    }

    /// Plain text, PDF, DOCX and Tesseract OCR in `ocr_language`.
    pub fn standard(ocr_language: &str) -> Self {
        Self::with_ocr(TesseractReader::new(ocr_language))
    }

    /// Plain text, PDF and DOCX plus the given OCR reader. Without a working
    /// `tesseract` binary image documents are still routed to it, so each one
    /// is skipped with the OCR error.
    pub fn with_ocr(ocr: TesseractReader) -> Self {
        if !ocr.is_available() {
            warn!(
                binary = %ocr.binary.display(),
                "Tesseract not found; image documents will be skipped"
            );
        }
        let mut registry = Self::empty();
        registry.register(Box::new(PlainTextReader));
        registry.register(Box::new(PdfReader));
        registry.register(Box::new(DocxReader));
        registry.register(Box::new(ocr));
        registry
    }

    pub fn register(&mut self, reader: Box<dyn DocumentReader>) {
        self.readers.push(reader);
    }

    /// Read and clean the text of one document.
    pub fn read(&self, path: &Path) -> Result<String, DocumentError> {
        let format = detect_format(path)?;
        if !format.category.is_supported() {
            return Err(DocumentError::UnsupportedType(format.mime_type));
        }
        let reader = self
            .readers
            .iter()
            .find(|r| r.handles(format.category))
            .ok_or_else(|| DocumentError::UnsupportedType(format.mime_type.clone()))?;

        let text = clean_document_text(&reader.read_text(path)?);
        if text.trim().is_empty() {
            return Err(DocumentError::EmptyText);
        }
        debug!(
            file = %path.display(),
            mime = %format.mime_type,
            reader = reader.name(),
            chars = text.chars().count(),
            "Document read"
        );
        Ok(text)
    }
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        Self::standard(DEFAULT_OCR_LANGUAGE)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_docx(path: &Path, document_xml: &str) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(document_xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    const DOCX_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body>
<w:p w:rsidR="00A1"><w:pPr><w:pStyle w:val="Title"/></w:pPr><w:r><w:t>Arztbrief</w:t></w:r></w:p>
<w:p><w:r><w:t xml:space="preserve">Diagnose: </w:t></w:r><w:r><w:t>NSCLC &amp; COPD</w:t></w:r></w:p>
<w:p><w:r><w:t>Alter</w:t></w:r><w:r><w:tab/></w:r><w:r><w:t>44</w:t></w:r></w:p>
<w:p/>
<w:tbl><w:tr><w:tc><w:p><w:r><w:t>PD-L1 &gt; 50%</w:t></w:r></w:p></w:tc></w:tr></w:tbl>
</w:body>
</w:document>"#;

    #[test]
    fn docx_paragraphs_in_document_order() {
        let paragraphs = docx_paragraphs(DOCX_BODY.as_bytes()).unwrap();
        assert_eq!(
            paragraphs,
            vec![
                "Arztbrief".to_string(),
                "Diagnose: NSCLC & COPD".to_string(),
                "Alter\t44".to_string(),
                "PD-L1 > 50%".to_string(),
            ]
        );
    }

    #[test]
    fn docx_reader_reads_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Patient-001_brief.docx");
        write_docx(&path, DOCX_BODY);
        let text = DocxReader.read_text(&path).unwrap();
        assert!(text.starts_with("Arztbrief\nDiagnose: NSCLC & COPD"));
    }

    #[test]
    fn docx_line_breaks_inside_paragraph() {
        let xml = "<w:p><w:r><w:t>Zeile 1</w:t><w:br/><w:t>Zeile 2</w:t></w:r></w:p>";
        assert_eq!(docx_paragraphs(xml.as_bytes()).unwrap(), vec!["Zeile 1\nZeile 2".to_string()]);
    }

    #[test]
    fn docx_text_box_keeps_rest_of_enclosing_paragraph() {
        let xml = concat!(
            "<w:p><w:r><w:t xml:space=\"preserve\">Diagnose: </w:t></w:r>",
            "<w:r><mc:AlternateContent><mc:Choice><w:drawing><wps:txbx><w:txbxContent>",
            "<w:p><w:r><w:t>Kasten</w:t></w:r></w:p>",
            "</w:txbxContent></wps:txbx></w:drawing></mc:Choice>",
            "<mc:Fallback><w:pict><v:textbox><w:txbxContent>",
            "<w:p><w:r><w:t>Kasten</w:t></w:r></w:p>",
            "</w:txbxContent></v:textbox></w:pict></mc:Fallback></mc:AlternateContent></w:r>",
            "<w:r><w:t>NSCLC Stadium IV</w:t></w:r></w:p>",
        );
        let paragraphs = docx_paragraphs(xml.as_bytes()).unwrap();
        assert_eq!(
            paragraphs,
            vec!["Kasten".to_string(), "Diagnose: NSCLC Stadium IV".to_string()]
        );
    }

    #[test]
    fn docx_tab_stop_definitions_are_not_text() {
        let xml = concat!(
            "<w:p><w:pPr><w:tabs><w:tab w:val=\"left\" w:pos=\"720\"/></w:tabs></w:pPr>",
            "<w:r><w:t>Alter</w:t><w:tab/><w:t>44</w:t></w:r></w:p>",
        );
        assert_eq!(docx_paragraphs(xml.as_bytes()).unwrap(), vec!["Alter\t44".to_string()]);
    }

    #[test]
    fn docx_entities_are_decoded() {
        let xml = "<w:p><w:r><w:t>&#228;&#xFC; &quot;x&apos; &lt;5</w:t></w:r></w:p>";
        assert_eq!(docx_paragraphs(xml.as_bytes()).unwrap(), vec!["äü \"x' <5".to_string()]);
    }

    #[test]
    fn malformed_docx_xml_is_an_error() {
        let err = docx_paragraphs("<w:p><w:r><w:t>offen</w:r></w:p>".as_bytes()).unwrap_err();
        assert!(matches!(err, DocumentError::Docx(_)));
    }

    #[test]
    fn encrypted_pdf_load_failure_is_recognised() {
        assert!(matches!(
            classify_load_failure("PdfiumLibraryInternalError(PasswordError)".into()),
            DocumentError::EncryptedPdf
        ));
        assert!(matches!(
            classify_load_failure("FormatError".into()),
            DocumentError::Pdf(_)
        ));
    }

    #[test]
    fn missing_tesseract_binary_is_ocr_error() {
        let reader = TesseractReader::default().with_binary("/nonexistent/tesseract");
        assert_eq!(reader.language(), "deu");
        assert!(!reader.is_available());
        let err = reader.read_text(Path::new("scan.png")).unwrap_err();
        assert!(matches!(err, DocumentError::Ocr(_)));
    }

    #[test]
    fn registry_without_tesseract_skips_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Patient-003_scan.png");
        std::fs::write(&path, [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]).unwrap();

        let registry =
            ReaderRegistry::with_ocr(TesseractReader::default().with_binary("/nonexistent/tesseract"));
        let err = registry.read(&path).unwrap_err();
        assert!(matches!(err, DocumentError::Ocr(_)));
    }

    #[test]
    fn registry_reads_and_cleans_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Patient-001_notes.txt");
        std::fs::write(&path, "Befund\u{200B} vom\r\n03/2019   stabil").unwrap();

        let text = ReaderRegistry::default().read(&path).unwrap();
        assert!(!text.contains('\u{200B}'));
        assert!(!text.contains('\r'));
        assert!(text.contains("03/2019"));
    }

    #[test]
    fn registry_rejects_unsupported_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Patient-001_blob.bin");
        std::fs::write(&path, [0x00, 0x01, 0x02, 0xFE, 0xFF, 0x00]).unwrap();
        let err = ReaderRegistry::default().read(&path).unwrap_err();
        assert!(matches!(err, DocumentError::UnsupportedType(ref mime) if mime == "application/octet-stream"));
    }

    #[test]
    fn registry_without_matching_reader_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "text").unwrap();
        let err = ReaderRegistry::empty().read(&path).unwrap_err();
        assert!(matches!(err, DocumentError::UnsupportedType(_)));
    }

    #[test]
    fn whitespace_only_document_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.txt");
        std::fs::write(&path, "   \n\n\t  \n").unwrap();
        let err = ReaderRegistry::default().read(&path).unwrap_err();
        assert!(matches!(err, DocumentError::EmptyText));
    }

    struct FakeOcr;

    impl DocumentReader for FakeOcr {
        fn name(&self) -> &'static str {
            "fake_ocr"
        }

        fn handles(&self, category: FileCategory) -> bool {
            category.needs_ocr()
        }

        fn read_text(&self, _path: &Path) -> Result<String, DocumentError> {
            Ok("Geschlecht: weiblich".into())
        }
    }

    #[test]
    fn first_registered_reader_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Patient-003_scan.png");
        std::fs::write(&path, [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]).unwrap();

        let mut registry = ReaderRegistry::empty();
        registry.register(Box::new(FakeOcr));
        registry.register(Box::new(TesseractReader::default().with_binary("/nonexistent")));
        assert_eq!(registry.read(&path).unwrap(), "Geschlecht: weiblich");
    }
}
