use std::path::PathBuf;

use clap::Parser;

use ehr_extract::config::Settings;

#[derive(Parser, Debug)]
#[command(
    name = "ehr-extract",
    version,
    about = "Extract structured patient attributes from clinical documents with a local LLM"
)]
pub struct Cli {
    /// Directory holding `<PatientIdentifier>-<n>_*` documents
    pub input_dir: PathBuf,

    /// TOML settings file (default: ./ehr-extract.toml, then the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Results table path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Single-character column delimiter
    #[arg(long)]
    pub delimiter: Option<char>,

    /// Ollama model name, e.g. gemma2:2b
    #[arg(long)]
    pub model: Option<String>,

    /// Ollama base URL (localhost only)
    #[arg(long)]
    pub base_url: Option<String>,

    #[arg(long)]
    pub chunk_size: Option<usize>,

    #[arg(long)]
    pub overlap: Option<usize>,

    /// Patients processed concurrently
    #[arg(long)]
    pub workers: Option<usize>,

    /// Write prompts and raw responses under this directory
    #[arg(long)]
    pub dump_dir: Option<PathBuf>,

    /// Append logs to this file as well as stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Debug-level logging for this crate
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    /// File settings with every flag given on the command line applied on top.
    pub fn resolve_settings(&self) -> Result<Settings, ehr_extract::config::ConfigError> {
        let mut settings = Settings::discover(self.config.as_deref())?;
        self.apply(&mut settings);
        Ok(settings)
    }

    pub fn apply(&self, settings: &mut Settings) {
        if let Some(output) = &self.output {
            settings.output.path = output.clone();
        }
        if let Some(delimiter) = self.delimiter {
            settings.output.delimiter = delimiter;
        }
        if let Some(model) = &self.model {
            settings.model.name = model.clone();
        }
        if let Some(base_url) = &self.base_url {
            settings.model.base_url = base_url.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            settings.windowing.chunk_size = chunk_size;
        }
        if let Some(overlap) = self.overlap {
            settings.windowing.overlap = overlap;
        }
        if let Some(workers) = self.workers {
            settings.pipeline.patient_workers = workers;
        }
        if let Some(dump_dir) = &self.dump_dir {
            settings.pipeline.dump_dir = Some(dump_dir.clone());
        }
        if let Some(log_file) = &self.log_file {
            settings.logging.file = Some(log_file.clone());
        }
        if self.verbose {
            settings.logging.filter = Some("ehr_extract=debug,warn".to_string());
        }
    }
}
