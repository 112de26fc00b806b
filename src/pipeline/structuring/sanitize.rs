// Text hygiene on both sides of the model: document text going in, raw
// responses coming out.

use std::sync::LazyLock;

use regex::Regex;

/// Clean extracted document text before windowing: strip invisible and
/// control characters, trim lines, collapse runs of blank lines.
///
/// OCR and PDF text layers are full of zero-width joiners, BOMs and form
/// feeds that cost context and confuse the model without carrying content.
pub fn clean_document_text(raw: &str) -> String {
    normalize_whitespace(&remove_invisible_chars(raw))
}

/// Remove invisible Unicode characters. Preserves space, newline, tab.
fn remove_invisible_chars(text: &str) -> String {
    text.chars()
        .filter(|c| {
            if matches!(*c, ' ' | '\n' | '\t') {
                return true;
            }
            if matches!(
                *c,
                '\u{00AD}'  // Soft hyphen
                | '\u{200B}' // Zero-width space
                | '\u{200C}' // Zero-width non-joiner
                | '\u{200D}' // Zero-width joiner
                | '\u{200E}' // Left-to-right mark
                | '\u{200F}' // Right-to-left mark
                | '\u{202A}'..='\u{202E}' // Directional embeddings and overrides
                | '\u{2060}'..='\u{2064}' // Word joiner, invisible operators
                | '\u{FEFF}' // BOM / zero-width no-break space
            ) {
                return false;
            }
            // \r and the remaining C0/C1 controls
            !c.is_control()
        })
        .collect()
}

/// Collapse multiple blank lines, trim per line.
fn normalize_whitespace(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut prev_blank = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !prev_blank {
                lines.push("");
                prev_blank = true;
            }
        } else {
            lines.push(trimmed);
            prev_blank = false;
        }
    }

    while lines.first() == Some(&"") {
        lines.remove(0);
    }
    while lines.last() == Some(&"") {
        lines.pop();
    }

    lines.join("\n")
}

/// Strip chat-template and thinking artefacts from a raw model response.
///
/// Gemma-family models served through Ollama sometimes leak
/// `<unusedN>thought` reasoning preambles and turn markers into the
/// response body. Everything else is returned untouched, trimmed.
pub fn sanitize_llm_output(raw: &str) -> String {
    // 1. Thinking markers: `<unusedN>thought` closing its own line
    static THOUGHT_MARKER_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<unused\d+>thought\r?\n").expect("valid regex"));
    let text = THOUGHT_MARKER_RE.replace_all(raw, "");

    // 2. Remaining special tokens
    static SPECIAL_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<unused\d+>|<end_of_turn>|<start_of_turn>(?:model|user)?|<\|eot_id\|>|<\|end_of_text\|>")
            .expect("valid regex")
    });
    let text = SPECIAL_TOKEN_RE.replace_all(&text, "");

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_unchanged() {
        let input = "Patient: Marie Dubois\nDiagnose: Adenokarzinom";
        assert_eq!(clean_document_text(input), input);
    }

    #[test]
    fn removes_zero_width_chars() {
        let input = "Pembro\u{200B}lizumab 200\u{FEFF}mg";
        assert_eq!(clean_document_text(input), "Pembrolizumab 200mg");
    }

    #[test]
    fn removes_bidi_overrides_and_soft_hyphens() {
        let input = "Normal \u{202E}desrever\u{202C} Chemo\u{00AD}therapie";
        let result = clean_document_text(input);
        assert!(!result.contains('\u{202E}'));
        assert!(!result.contains('\u{202C}'));
        assert!(result.contains("Chemotherapie"));
    }

    #[test]
    fn control_chars_removed() {
        let input = "Dosis:\x01 500mg\x0C täglich\r\n";
        let result = clean_document_text(input);
        assert_eq!(result, "Dosis: 500mg täglich");
    }

    #[test]
    fn normalizes_whitespace() {
        let input = "  Line one  \n\n\n\n  Line two  \n\n\n  Line three  ";
        assert_eq!(clean_document_text(input), "Line one\n\nLine two\n\nLine three");
    }

    #[test]
    fn preserves_german_and_french_text() {
        let input = "Größe: 1,5 cm\nRésultat: protéine élevée 42µg/L";
        assert_eq!(clean_document_text(input), input);
    }

    #[test]
    fn empty_input_returns_empty() {
        assert_eq!(clean_document_text(""), "");
        assert_eq!(clean_document_text("\n\n  \n"), "");
    }

    #[test]
    fn output_strips_thinking_preamble() {
        let raw = "<unused94>thought\n```python\n{'age': '44'}\n```";
        assert_eq!(sanitize_llm_output(raw), "```python\n{'age': '44'}\n```");
    }

    #[test]
    fn output_keeps_payload_mentioning_thought() {
        let raw = "<unused0>```python\n{'note': '''patient thought\nabout it''', 'age': 44}\n```";
        assert_eq!(
            sanitize_llm_output(raw),
            "```python\n{'note': '''patient thought\nabout it''', 'age': 44}\n```"
        );
    }

    #[test]
    fn output_strips_turn_markers() {
        let raw = "{'age': '44'}<end_of_turn>\n<|eot_id|>";
        assert_eq!(sanitize_llm_output(raw), "{'age': '44'}");
        let raw = "<start_of_turn>model\n{'gender': 'N/A'}";
        assert_eq!(sanitize_llm_output(raw), "{'gender': 'N/A'}");
    }

    #[test]
    fn output_strips_stray_unused_tokens() {
        assert_eq!(sanitize_llm_output("<unused3>{'a': 1}<unused12>"), "{'a': 1}");
    }

    #[test]
    fn output_keeps_text_before_artefacts() {
        let raw = "Here is the result:\n<unused1>thought\n{'age': '44'}";
        assert_eq!(sanitize_llm_output(raw), "Here is the result:\n{'age': '44'}");
    }

    #[test]
    fn output_plain_text_untouched() {
        let raw = "  Here is the result:\n```json\n{\"age\": \"44\"}\n```  ";
        assert_eq!(sanitize_llm_output(raw), raw.trim());
    }
}
