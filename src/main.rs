use anyhow::Result;
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use survey_export_ripper::{run, RunSummary};
use time::macros::format_description;

#[derive(Parser)]
#[command(name = "Survey Export Ripper")]
#[command(about = "Rip a survey session JSON export into aggregated response and device CSVs")]
#[command(version = "1.0")]
struct Cli {
    /// Directory holding exactly one JSON export; all outputs are written here.
    target: PathBuf,
}

fn setup_logging() -> Result<()> {
    // RUST_LOG overrides the INFO default.
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .with_timestamp_format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .init()?;
    Ok(())
}

fn format_elapsed(elapsed: Duration) -> String {
    let total_secs = elapsed.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let millis = elapsed.subsec_millis();

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}.{:03}s", seconds, millis)
    }
}

fn print_final_summary(start_time: Instant, summary: &RunSummary) {
    info!("-------------------- FINAL SUMMARY --------------------");
    info!("Total execution time: {}", format_elapsed(start_time.elapsed()));
    info!("Subjects in export: {}", summary.subjects);
    info!("Subjects parsed: {}", summary.parsed.len());
    info!("Subjects without answers: {}", summary.empty_answers.len());

    if !summary.failed.is_empty() {
        warn!("Subjects with parse errors: {}", summary.failed.len());
        for (key, message) in summary.failed.iter().take(10) {
            warn!("  - {}: {}", key, message);
        }
        if summary.failed.len() > 10 {
            warn!("  ... (and {} more)", summary.failed.len() - 10);
        }
    }

    match summary.pings_rows {
        Some(rows) => info!("Response rows written: {} -> {}", rows, summary.layout.pings_csv.display()),
        None => warn!("No response rows written"),
    }
    info!("Parent errors saved to: {}", summary.layout.parent_errors_json.display());
    info!("Device rows written: {} -> {}", summary.device_rows, summary.layout.devices_csv.display());
    if !summary.device_failures.is_empty() {
        warn!(
            "Device parse errors: {} (see {})",
            summary.device_failures.len(),
            summary.layout.device_log.display()
        );
    }
}

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();

    setup_logging()?;
    info!("Starting survey export ripper for: {}", cli.target.display());

    let summary = run(&cli.target).inspect_err(|e| error!("Run aborted: {:#}", e))?;
    print_final_summary(start_time, &summary);

    info!("All responses + devices parsed");
    info!("-------------------------------------------------------");
    Ok(())
}
