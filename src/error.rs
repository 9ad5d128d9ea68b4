use std::path::PathBuf;
use thiserror::Error;

/// Fatal conditions the pipeline classifies itself. Everything else travels as
/// a plain `anyhow::Error` with context attached.
#[derive(Debug, Error)]
pub enum RipError {
    #[error("no JSON export found in {}", .0.display())]
    NoJsonFile(PathBuf),

    #[error("expected exactly one JSON export in {}, found {}: {}", dir.display(), found.len(), list_paths(found))]
    AmbiguousJsonFiles { dir: PathBuf, found: Vec<PathBuf> },

    #[error("no objects to concatenate ({pass} pass)")]
    NoObjectsToConcatenate { pass: &'static str },

    #[error("export root in {} must be a JSON object keyed by subject", .0.display())]
    InvalidDocumentRoot(PathBuf),
}

fn list_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
