pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"
You are a clinical data abstraction assistant. Your ONLY role is to copy
clinical facts that are explicitly written in patient records into a
structured dictionary.

RULES:
1. Extract ONLY information explicitly stated in the records.
2. NEVER add interpretation, diagnosis, advice, or clinical opinion.
3. NEVER include patient names or other direct identifiers.
4. Preserve values (doses, marker values, dates) as written.
5. Answer with a single well-formed Python dictionary.
"#;

/// Attribute list shared by the window and summary instructions.
const ATTRIBUTES: &str = r#"    * `gender` (string: "male", "female", or "N/A")
    * `age` (integer or "N/A")
    * `race` (string or "N/A")
    * `diagnosis` (string or "N/A")
    * `number_of_systemic_treatment_lines_no_surgery_or_radiotherapy_without_systemic_treatment` (integer or "N/A")
    * `description_of_previous_systemic_treatment_lines` (string or "N/A")
    * `immune_checkpoint_inhibitor_treatment` (list of strings in the format "[IMMUNE CHECKPOINT INHIBITOR TREATMENT] [OUTCOME] [PROGRESSION FREE SURVIVAL IN MONTHS]", or "N/A")
    * `biomarkers` (list of strings in the format "[MARKER NAME] [VALUE]" or "[MARKER NAME] [HIGH/LOW]", or "N/A")
    * `date_at_first_diagnosis` (date in format "MM/YYYY", or "N/A")
    * `date_of_death` (date in format "MM/YYYY", or "N/A")
    * `overall_survival` (numerical value or "N/A")"#;

const OUTPUT_RULES: &str = r#"3. Store the extracted data in a Python dictionary.
4. Do not include patient names in the output.
5. Only return data fields that you find in the record. If a data point is not mentioned, do not include it in the output dictionary.

OUTPUT FORMAT:
A well-formed Python dictionary in a ```python fenced block.

EXAMPLE OUTPUT:
```python
{
    "age": 44,
    "gender": "female",
    "diagnosis": "Endometrial carcinoma",
    "biomarkers": ["PD-L1 CPS 41", "TMB 3.1", "MMR pMMR"],
    "immune_checkpoint_inhibitor_treatment": ["Pembrolizumab PR 7"],
    "date_at_first_diagnosis": "03/2019",
}
```"#;

/// Instruction sent with every window.
pub fn extraction_instruction() -> String {
    format!(
        "TASK:\nExtract key clinical data points from an unstructured patient record and \
         organize them into a Python dictionary.\n\n\
         INSTRUCTIONS:\n1. Analyze the patient record provided.\n\
         2. Extract the following data points:\n{ATTRIBUTES}\n{OUTPUT_RULES}"
    )
}

/// Instruction sent with the consolidated partial extractions.
pub fn summary_instruction() -> String {
    format!(
        "TASK:\nConsolidate partial extractions, each made from one section of the same \
         patient's records, into a single Python dictionary.\n\n\
         INSTRUCTIONS:\n1. Analyze all partial extractions provided. When they disagree, \
         prefer the most specific value.\n\
         2. Extract the following data points:\n{ATTRIBUTES}\n{OUTPUT_RULES}"
    )
}

/// Build the prompt for one window of a patient document.
pub fn build_window_prompt(instruction: &str, window_text: &str) -> String {
    format!("{instruction}\n\nPATIENT RECORDS:\n<records>\n{window_text}\n</records>\n")
}

/// Build the reduction prompt from the surviving partial responses, in
/// document order.
pub fn build_summary_prompt<S: AsRef<str>>(instruction: &str, partials: &[S]) -> String {
    let total = partials.len();
    let mut rendered = String::new();
    for (i, partial) in partials.iter().enumerate() {
        rendered.push_str(&format!(
            "<extraction part=\"{} of {total}\">\n{}\n</extraction>\n",
            i + 1,
            partial.as_ref().trim()
        ));
    }

    format!("{instruction}\n\nPARTIAL EXTRACTIONS:\n{rendered}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_prompt_contains_text_and_instruction() {
        let prompt = build_window_prompt(&extraction_instruction(), "Pembrolizumab seit 04/2021");
        assert!(prompt.contains("Pembrolizumab seit 04/2021"));
        assert!(prompt.contains("<records>"));
        assert!(prompt.contains("</records>"));
        assert!(prompt.contains("date_at_first_diagnosis"));
    }

    #[test]
    fn instructions_ask_for_omission_not_null() {
        for instruction in [extraction_instruction(), summary_instruction()] {
            assert!(instruction.contains("do not include it in the output dictionary"));
            assert!(instruction.contains("Python dictionary"));
            assert!(instruction.contains("overall_survival"));
        }
    }

    #[test]
    fn summary_prompt_numbers_partials_in_order() {
        let prompt = build_summary_prompt(&summary_instruction(), &["{'age': 44}", "{'gender': 'female'}"]);
        let first = prompt.find("part=\"1 of 2\"").unwrap();
        let second = prompt.find("part=\"2 of 2\"").unwrap();
        assert!(first < second);
        assert!(prompt.find("{'age': 44}").unwrap() < prompt.find("{'gender': 'female'}").unwrap());
    }

    #[test]
    fn summary_prompt_with_single_partial() {
        let partials = vec![String::from("  {'race': 'N/A'}\n")];
        let prompt = build_summary_prompt("Consolidate.", &partials);
        assert!(prompt.contains("part=\"1 of 1\">\n{'race': 'N/A'}\n</extraction>"));
    }

    #[test]
    fn system_prompt_forbids_names() {
        assert!(EXTRACTION_SYSTEM_PROMPT.contains("NEVER include patient names"));
        assert!(EXTRACTION_SYSTEM_PROMPT.contains("ONLY"));
    }
}
