//! Overlapping fixed-size windows over a patient document.
//!
//! A patient's combined records are usually far larger than the model's
//! context, so the document is cut into windows of at most `chunk_size`
//! characters. Consecutive windows share `overlap` characters so content cut
//! at a seam still appears whole in one of the two windows.
//!
//! Offsets are character offsets, never byte offsets: records are frequently
//! German or French OCR output and a byte cut could land inside a code point.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowConfigError {
    #[error("chunk_size must be greater than zero")]
    ZeroChunkSize,

    #[error("overlap ({overlap}) must be smaller than chunk_size ({chunk_size})")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },
}

/// Validated windowing parameters.
///
/// Construction is the only place the `overlap < chunk_size` invariant is
/// checked; every `Windows` iterator built from a `WindowConfig` is
/// guaranteed to advance by at least one character per step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    chunk_size: usize,
    overlap: usize,
}

impl WindowConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, WindowConfigError> {
        if chunk_size == 0 {
            return Err(WindowConfigError::ZeroChunkSize);
        }
        if overlap >= chunk_size {
            return Err(WindowConfigError::OverlapTooLarge {
                chunk_size,
                overlap,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between the starts of two consecutive windows.
    pub fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }

    /// Lazily window `document`. Call again to restart from the beginning.
    pub fn windows<'a>(&self, document: &'a str) -> Windows<'a> {
        Windows {
            document,
            config: *self,
            char_len: document.chars().count(),
            next_start: if document.is_empty() { None } else { Some((0, 0)) },
            index: 0,
        }
    }

    /// Number of windows a document of `char_len` characters produces.
    pub fn window_count(&self, char_len: usize) -> usize {
        if char_len == 0 {
            0
        } else if char_len <= self.chunk_size {
            1
        } else {
            1 + (char_len - self.chunk_size).div_ceil(self.stride())
        }
    }
}

/// Window a document in one call, validating the parameters first.
pub fn window(
    document: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Windows<'_>, WindowConfigError> {
    Ok(WindowConfig::new(chunk_size, overlap)?.windows(document))
}

/// A contiguous `[start, end)` character range of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window<'a> {
    /// Position in document order, starting at 0.
    pub index: usize,
    pub start: usize,
    pub end: usize,
    /// Characters shared with the previous window (0 for the first).
    pub overlap: usize,
    pub text: &'a str,
}

impl Window<'_> {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone)]
pub struct Windows<'a> {
    document: &'a str,
    config: WindowConfig,
    char_len: usize,
    /// (char offset, byte offset) of the next window; `None` once the
    /// document end has been emitted.
    next_start: Option<(usize, usize)>,
    index: usize,
}

impl<'a> Iterator for Windows<'a> {
    type Item = Window<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (start, start_byte) = self.next_start?;
        let end = (start + self.config.chunk_size).min(self.char_len);
        let end_byte = advance_chars(self.document, start_byte, end - start);

        let window = Window {
            index: self.index,
            start,
            end,
            overlap: if self.index == 0 { 0 } else { self.config.overlap },
            text: &self.document[start_byte..end_byte],
        };

        self.next_start = if end == self.char_len {
            None
        } else {
            let next = end - self.config.overlap;
            Some((next, advance_chars(self.document, start_byte, next - start)))
        };
        self.index += 1;

        Some(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = match self.next_start {
            None => 0,
            Some((start, _)) => self.config.window_count(self.char_len - start),
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Windows<'_> {}

/// Byte offset reached by moving `chars` characters forward from `from`.
fn advance_chars(text: &str, from: usize, chars: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(chars)
        .map(|(i, _)| from + i)
        .unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(doc: &str, chunk: usize, overlap: usize) -> Vec<Window<'_>> {
        window(doc, chunk, overlap).unwrap().collect()
    }

    #[test]
    fn short_document_is_a_single_window() {
        let doc = "Patient is a 44 year old female.";
        let windows = collect(doc, 5000, 100);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].text, doc);
        assert_eq!(windows[0].start, 0);
        assert_eq!(windows[0].end, doc.len());
        assert_eq!(windows[0].overlap, 0);
    }

    #[test]
    fn document_exactly_chunk_size_is_a_single_window() {
        let doc = "x".repeat(50);
        let windows = collect(&doc, 50, 10);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].text, doc);
    }

    #[test]
    fn two_windows_for_six_thousand_chars() {
        let doc = "AB".repeat(3000);
        let windows = collect(&doc, 5000, 100);

        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].len(), 5000);
        assert_eq!(windows[1].start, 4900);
        assert_eq!(windows[1].end, 6000);
        assert!(windows[1].len() < 5000);
    }

    #[test]
    fn consecutive_windows_share_exactly_the_overlap() {
        let doc: String = (0..2_345).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let windows = collect(&doc, 300, 40);

        for pair in windows.windows(2) {
            assert_eq!(pair[0].end - pair[1].start, 40);
            let shared_prev = &pair[0].text[pair[0].text.len() - 40..];
            let shared_next = &pair[1].text[..40];
            assert_eq!(shared_prev, shared_next);
        }
    }

    #[test]
    fn windows_cover_the_document_without_gaps() {
        let doc: String = (0..1_001).map(|i| char::from(b'0' + (i % 10) as u8)).collect();
        let windows = collect(&doc, 128, 16);

        let mut rebuilt = String::from(windows[0].text);
        for w in &windows[1..] {
            rebuilt.push_str(&w.text[w.overlap..]);
        }
        assert_eq!(rebuilt, doc);
        assert_eq!(windows.last().unwrap().end, doc.len());
    }

    #[test]
    fn no_window_exceeds_chunk_size_or_document() {
        let doc = "z".repeat(10_007);
        for w in collect(&doc, 999, 333) {
            assert!(w.len() <= 999);
            assert!(w.end <= doc.len());
        }
    }

    #[test]
    fn window_count_matches_iteration() {
        for len in [0, 1, 99, 100, 101, 250, 1_000, 4_321] {
            let doc = "q".repeat(len);
            let config = WindowConfig::new(100, 25).unwrap();
            assert_eq!(config.windows(&doc).count(), config.window_count(len), "len={len}");
            assert_eq!(config.windows(&doc).len(), config.window_count(len));
        }
    }

    #[test]
    fn step_count_is_bounded_by_stride() {
        let doc = "k".repeat(100_000);
        let config = WindowConfig::new(10, 9).unwrap();
        // stride of one character: one window per remaining position
        assert_eq!(config.windows(&doc).count(), 100_000 - 10 + 1);
    }

    #[test]
    fn empty_document_yields_no_windows() {
        assert_eq!(collect("", 100, 10).len(), 0);
    }

    #[test]
    fn overlap_equal_to_chunk_size_fails_fast() {
        let err = window("abc", 100, 100).unwrap_err();
        assert_eq!(
            err,
            WindowConfigError::OverlapTooLarge {
                chunk_size: 100,
                overlap: 100
            }
        );
        assert!(WindowConfig::new(100, 250).is_err());
    }

    #[test]
    fn zero_chunk_size_fails_fast() {
        assert_eq!(WindowConfig::new(0, 0), Err(WindowConfigError::ZeroChunkSize));
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundaries() {
        let doc = "Größe ärztlicher Befund über Lymphknoten ".repeat(20);
        let windows = collect(&doc, 37, 5);
        assert!(windows.len() > 1);
        for w in &windows {
            assert_eq!(w.text.chars().count(), w.len());
        }
    }

    #[test]
    fn iteration_is_restartable() {
        let doc = "restart me ".repeat(100);
        let config = WindowConfig::new(64, 8).unwrap();
        let first: Vec<_> = config.windows(&doc).collect();
        let second: Vec<_> = config.windows(&doc).collect();
        assert_eq!(first, second);

        let it = config.windows(&doc);
        let cloned: Vec<_> = it.clone().collect();
        assert_eq!(cloned, first);
    }
}
