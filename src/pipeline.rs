use crate::devices::parse_device_info;
use crate::error::RipError;
use crate::responses::{answer_count, parse_responses};
use crate::setup::{isolate_json_file, setup, OutputLayout};
use crate::subject::SubjectKey;
use crate::table::Table;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Serializer, Value};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// The export document: subject key to raw subject record, in file order.
pub type Export = Map<String, Value>;

/// Terminal state of one subject in the response pass.
#[derive(Debug)]
pub enum SubjectOutcome {
    EmptyAnswers,
    ParseFailed(anyhow::Error),
    Parsed(Table),
}

/// Everything the response pass learned about the export.
#[derive(Debug, Default)]
pub struct ResponsePass {
    pub tables: Vec<Table>,
    pub parsed: Vec<String>,
    /// Raw records of subjects with no answers, keyed like the export.
    pub parent_errors: Export,
    /// Subjects whose parse failed, with the rendered error.
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct DevicePass {
    pub tables: Vec<Table>,
    pub failed: Vec<(String, String)>,
}

#[derive(Debug)]
pub struct RunSummary {
    pub layout: OutputLayout,
    pub subjects: usize,
    pub parsed: Vec<String>,
    pub empty_answers: Vec<String>,
    pub failed: Vec<(String, String)>,
    /// Rows in the pings CSV, `None` when nothing parsed and no file was written.
    pub pings_rows: Option<usize>,
    pub device_rows: usize,
    pub device_failures: Vec<(String, String)>,
}

fn subject_progress_bar(len: usize, message: &'static str) -> Result<ProgressBar> {
    let progress_bar = ProgressBar::new(len as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
            .progress_chars("=> "),
    );
    progress_bar.set_message(message);
    Ok(progress_bar)
}

/// Reads the export and checks that its root is a mapping of subjects.
pub fn load_export(path: &Path) -> Result<Export> {
    let file = File::open(path).with_context(|| format!("Failed to open export: {}", path.display()))?;
    let file_size = file.metadata()?.len();

    let pb_read = ProgressBar::new(file_size);
    pb_read.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Reading [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")?
            .progress_chars("#>-"),
    );
    let document: Value = serde_json::from_reader(BufReader::new(pb_read.wrap_read(file)))
        .with_context(|| format!("Failed to parse JSON export: {}", path.display()))?;
    pb_read.finish_and_clear();

    match document {
        Value::Object(subjects) => {
            info!("Loaded {} subjects from {}", subjects.len(), path.display());
            Ok(subjects)
        }
        _ => Err(RipError::InvalidDocumentRoot(path.to_path_buf()).into()),
    }
}

/// Decides the fate of one subject. Subjects with an empty answer list never
/// reach the parser.
pub fn classify_subject(key: &str, record: &Value, subject_dir: &Path) -> SubjectOutcome {
    if answer_count(record) == Some(0) {
        return SubjectOutcome::EmptyAnswers;
    }
    match parse_responses(key, record, subject_dir, true) {
        Ok(table) => SubjectOutcome::Parsed(table),
        Err(e) => SubjectOutcome::ParseFailed(e),
    }
}

/// Runs every subject through the response parser, logging failures to the
/// response log. The log is truncated first and closed when the pass ends.
pub fn response_pass(data: &Export, layout: &OutputLayout) -> Result<ResponsePass> {
    let log_file = File::create(&layout.response_log)
        .with_context(|| format!("Failed to create response log: {}", layout.response_log.display()))?;
    let mut log = BufWriter::new(log_file);
    let mut pass = ResponsePass::default();

    let progress_bar = subject_progress_bar(data.len(), "Parsing participant data...")?;
    for (key, record) in data {
        match classify_subject(key, record, &layout.subjects_dir) {
            SubjectOutcome::EmptyAnswers => {
                debug!("{} has no answers, moving to parent errors", key);
                pass.parent_errors.insert(key.clone(), record.clone());
            }
            SubjectOutcome::ParseFailed(e) => {
                warn!("Failed to parse responses for {}: {:#}", key, e);
                write!(log, "\nCaught @ {}: {:#}\n\n", SubjectKey(key).username(), e)
                    .context("Failed to write to response log")?;
                pass.failed.push((key.clone(), format!("{:#}", e)));
            }
            SubjectOutcome::Parsed(table) => {
                pass.parsed.push(key.clone());
                pass.tables.push(table);
            }
        }
        progress_bar.inc(1);
    }
    progress_bar.finish_with_message(format!(
        "Responses finished. {} parsed, {} without answers, {} failed.",
        pass.parsed.len(),
        pass.parent_errors.len(),
        pass.failed.len()
    ));

    log.flush()
        .with_context(|| format!("Failed to flush response log: {}", layout.response_log.display()))?;
    Ok(pass)
}

/// Writes the combined response table. When nothing parsed the condition is
/// reported and no file is created.
pub fn write_pings(pass: &ResponsePass, layout: &OutputLayout) -> Result<Option<usize>> {
    match Table::concat(&pass.tables, "response") {
        Ok(aggregate) => {
            aggregate.write_csv(&layout.pings_csv)?;
            info!("Wrote {} response rows to {}", aggregate.len(), layout.pings_csv.display());
            Ok(Some(aggregate.len()))
        }
        Err(e) => {
            warn!("No objects to concatenate, {} not written ({})", layout.pings_csv.display(), e);
            Ok(None)
        }
    }
}

/// Serializes the subjects without answers with four-space indentation.
pub fn write_parent_errors(parent_errors: &Export, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create parent errors file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut serializer = Serializer::with_formatter(&mut writer, PrettyFormatter::with_indent(b"    "));
    parent_errors
        .serialize(&mut serializer)
        .with_context(|| format!("Failed to serialize parent errors to: {}", path.display()))?;
    writer.flush()?;
    info!("Saved {} parent errors to {}", parent_errors.len(), path.display());
    Ok(())
}

/// Runs every subject through the device parser. Unlike the response pass
/// there is no empty-answers shortcut.
pub fn device_pass(data: &Export, layout: &OutputLayout) -> Result<DevicePass> {
    let log_file = File::create(&layout.device_log)
        .with_context(|| format!("Failed to create device log: {}", layout.device_log.display()))?;
    let mut log = BufWriter::new(log_file);
    let mut pass = DevicePass::default();

    let progress_bar = subject_progress_bar(data.len(), "Parsing device information...")?;
    for (key, record) in data {
        match parse_device_info(key, record) {
            Ok(table) => pass.tables.push(table),
            Err(e) => {
                warn!("Failed to parse device info for {}: {:#}", key, e);
                write!(log, "\nCaught {} @ device parser: {:#}\n\n", SubjectKey(key).username(), e)
                    .context("Failed to write to device log")?;
                pass.failed.push((key.clone(), format!("{:#}", e)));
            }
        }
        progress_bar.inc(1);
    }
    progress_bar.finish_with_message(format!(
        "Devices finished. {} OK, {} failed.",
        pass.tables.len(),
        pass.failed.len()
    ));

    log.flush()
        .with_context(|| format!("Failed to flush device log: {}", layout.device_log.display()))?;
    Ok(pass)
}

/// Writes the combined device table. Zero successful device parses is fatal.
pub fn write_devices(pass: &DevicePass, layout: &OutputLayout) -> Result<usize> {
    let devices = Table::concat(&pass.tables, "device")?;
    devices.write_csv(&layout.devices_csv)?;
    info!("Wrote {} device rows to {}", devices.len(), layout.devices_csv.display());
    Ok(devices.len())
}

/// Full run over `target`: setup, response pass, aggregation, device pass.
pub fn run<P: AsRef<Path>>(target: P) -> Result<RunSummary> {
    let target = target.as_ref();
    info!("Preparing output directories in {}", target.display());
    setup(target)?;
    let (export_path, basename) = isolate_json_file(target)?;
    let layout = OutputLayout::new(target, &basename);
    let data = load_export(&export_path)?;

    info!("Parsing participant data...");
    let responses = response_pass(&data, &layout)?;

    info!("Aggregating participant data...");
    let pings_rows = write_pings(&responses, &layout)?;

    info!("Saving parent errors...");
    write_parent_errors(&responses.parent_errors, &layout.parent_errors_json)?;

    info!("Parsing device information...");
    let devices = device_pass(&data, &layout)?;
    let device_rows = write_devices(&devices, &layout)?;

    Ok(RunSummary {
        subjects: data.len(),
        parsed: responses.parsed,
        empty_answers: responses.parent_errors.keys().cloned().collect(),
        failed: responses.failed,
        pings_rows,
        device_rows,
        device_failures: devices.failed,
        layout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn export(value: Value) -> Export {
        match value {
            Value::Object(map) => map,
            _ => panic!("test export must be an object"),
        }
    }

    fn layout_in(dir: &TempDir) -> OutputLayout {
        setup(dir.path()).unwrap();
        OutputLayout::new(dir.path(), "export")
    }

    #[test]
    fn classification_covers_all_terminal_states() {
        let dir = TempDir::new().unwrap();

        let empty = classify_subject("a-1", &json!({"answers": []}), dir.path());
        assert!(matches!(empty, SubjectOutcome::EmptyAnswers));

        let failed = classify_subject("b-1", &json!({"answers": [3]}), dir.path());
        assert!(matches!(failed, SubjectOutcome::ParseFailed(_)));

        let missing = classify_subject("c-1", &json!({}), dir.path());
        assert!(matches!(missing, SubjectOutcome::ParseFailed(_)));

        match classify_subject("d-1", &json!({"answers": [{"q": 1}]}), dir.path()) {
            SubjectOutcome::Parsed(table) => assert_eq!(table.len(), 1),
            other => panic!("expected parsed, got {:?}", other),
        }
        assert!(dir.path().join("d-1.csv").exists());
    }

    #[test]
    fn response_pass_buckets_every_subject_once() {
        let dir = TempDir::new().unwrap();
        let layout = layout_in(&dir);
        let data = export(json!({
            "alice-001": {"answers": [{"q": 1}]},
            "bob-002": {"answers": []},
            "carol-003": {"answers": "broken"},
            "dave-004": {"answers": [{"q": 2}, {"q": 3}]}
        }));

        let pass = response_pass(&data, &layout).unwrap();
        assert_eq!(pass.parsed, ["alice-001", "dave-004"]);
        assert_eq!(pass.parent_errors.keys().collect::<Vec<_>>(), ["bob-002"]);
        assert_eq!(pass.failed.len(), 1);
        assert_eq!(pass.failed[0].0, "carol-003");

        let log = fs::read_to_string(&layout.response_log).unwrap();
        assert_eq!(log, "\nCaught @ carol: 'answers' is not a list (found string)\n\n");
    }

    #[test]
    fn empty_response_aggregate_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let layout = layout_in(&dir);
        let rows = write_pings(&ResponsePass::default(), &layout).unwrap();
        assert_eq!(rows, None);
        assert!(!layout.pings_csv.exists());
    }

    #[test]
    fn parent_errors_use_four_space_indent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("parent-errors.json");
        let data = export(json!({"bob-002": {"answers": []}}));

        write_parent_errors(&data, &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "{\n    \"bob-002\": {\n        \"answers\": []\n    }\n}");

        write_parent_errors(&Export::new(), &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn device_pass_attempts_every_subject() {
        let dir = TempDir::new().unwrap();
        let layout = layout_in(&dir);
        let data = export(json!({
            "alice-001": {"answers": [], "device": {"model": "Pixel"}},
            "bob-002": {"answers": [{"q": 1}]}
        }));

        let pass = device_pass(&data, &layout).unwrap();
        assert_eq!(pass.tables.len(), 1);
        assert_eq!(pass.failed.len(), 1);
        let log = fs::read_to_string(&layout.device_log).unwrap();
        assert_eq!(log, "\nCaught bob @ device parser: record has no 'device' field\n\n");

        assert_eq!(write_devices(&pass, &layout).unwrap(), 1);
    }

    #[test]
    fn device_aggregate_of_nothing_is_fatal() {
        let dir = TempDir::new().unwrap();
        let layout = layout_in(&dir);
        let err = write_devices(&DevicePass::default(), &layout).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RipError>(),
            Some(RipError::NoObjectsToConcatenate { pass: "device" })
        ));
        assert!(!layout.devices_csv.exists());
    }

    #[test]
    fn non_object_export_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("export.json");
        fs::write(&path, "[1, 2, 3]").unwrap();
        let err = load_export(&path).unwrap_err();
        assert!(matches!(err.downcast_ref::<RipError>(), Some(RipError::InvalidDocumentRoot(_))));
    }
}
