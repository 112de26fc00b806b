mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;

use ehr_extract::config::{default_log_filter, Settings};
use ehr_extract::init_tracing;
use ehr_extract::pipeline::processor::run_pipeline;

use crate::cli::Cli;

fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(&cli) {
        error!(error = %err, "run failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let settings = match cli.resolve_settings() {
        Ok(settings) => settings,
        Err(e) => {
            let _ = init_tracing(default_log_filter(), None);
            return Err(e).context("failed to load settings");
        }
    };
    init_logging(&settings)?;

    let summary = run_pipeline(&settings, &cli.input_dir)
        .with_context(|| format!("extraction over {} failed", cli.input_dir.display()))?;

    let report = &summary.report;
    println!(
        "{} of {} patients extracted, {} excluded -> {}",
        report.patients_parsed,
        report.patients_total,
        report.patients_failed,
        summary.output_path.display()
    );
    if let Some(dump_dir) = &summary.dump_dir {
        println!("diagnostic dump: {}", dump_dir.display());
    }
    Ok(())
}

fn init_logging(settings: &Settings) -> Result<()> {
    let filter = settings
        .logging
        .filter
        .as_deref()
        .unwrap_or(default_log_filter());
    if let Err(e) = init_tracing(filter, settings.logging.file.as_deref()) {
        let _ = init_tracing(filter, None);
        return Err(e).context("failed to initialise logging");
    }
    Ok(())
}
