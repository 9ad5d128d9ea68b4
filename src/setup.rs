use crate::error::RipError;
use anyhow::{Context, Result};
use glob::{glob, Pattern};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

pub const SUBJECTS_DIR: &str = "00-Subjects";
pub const AGGREGATE_DIR: &str = "01-Aggregate";
pub const PARENT_ERRORS_FILE: &str = "parent-errors.json";
pub const DEVICE_LOG_FILE: &str = "device-error-log.txt";

/// Creates the output directory tree under `target`. Safe to call repeatedly.
pub fn setup<P: AsRef<Path>>(target: P) -> Result<()> {
    let target = target.as_ref();
    for dir in [SUBJECTS_DIR, AGGREGATE_DIR] {
        let path = target.join(dir);
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create output directory: {}", path.display()))?;
        debug!("Ensured output directory {}", path.display());
    }
    Ok(())
}

/// Locates the single `*.json` export directly inside `target` and returns its
/// path together with the file stem used to name the run's outputs.
pub fn isolate_json_file<P: AsRef<Path>>(target: P) -> Result<(PathBuf, String)> {
    let target = target.as_ref();
    let pattern = format!("{}/*.json", Pattern::escape(&target.to_string_lossy()));
    info!("Searching for JSON export matching pattern: {}", pattern);

    let mut found: Vec<PathBuf> = glob(&pattern)?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    found.sort();

    let path = match found.len() {
        0 => return Err(RipError::NoJsonFile(target.to_path_buf()).into()),
        1 => found.remove(0),
        _ => {
            return Err(RipError::AmbiguousJsonFiles {
                dir: target.to_path_buf(),
                found,
            }
            .into())
        }
    };

    let basename = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .with_context(|| format!("JSON export has no file name: {}", path.display()))?;
    info!("Using export {} (output basename '{}')", path.display(), basename);
    Ok((path, basename))
}

/// Every path a run writes to, derived from the target directory and the
/// export's basename.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub subjects_dir: PathBuf,
    pub aggregate_dir: PathBuf,
    pub pings_csv: PathBuf,
    pub parent_errors_json: PathBuf,
    pub devices_csv: PathBuf,
    pub response_log: PathBuf,
    pub device_log: PathBuf,
}

impl OutputLayout {
    pub fn new<P: AsRef<Path>>(target: P, basename: &str) -> Self {
        let target = target.as_ref();
        let aggregate_dir = target.join(AGGREGATE_DIR);
        Self {
            subjects_dir: target.join(SUBJECTS_DIR),
            pings_csv: aggregate_dir.join(format!("pings_{}.csv", basename)),
            parent_errors_json: aggregate_dir.join(PARENT_ERRORS_FILE),
            devices_csv: aggregate_dir.join(format!("devices_{}.csv", basename)),
            response_log: target.join(format!("{}.txt", basename)),
            device_log: target.join(DEVICE_LOG_FILE),
            aggregate_dir,
        }
    }
}
