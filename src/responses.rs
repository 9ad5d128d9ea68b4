use crate::subject::SubjectKey;
use crate::table::{flatten, Table};
use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Length of the record's `answers` field, when it has one that can be
/// measured (array, object or string).
pub fn answer_count(record: &Value) -> Option<usize> {
    match record.get("answers")? {
        Value::Array(a) => Some(a.len()),
        Value::Object(o) => Some(o.len()),
        Value::String(s) => Some(s.len()),
        _ => None,
    }
}

/// Path of the per-subject CSV inside `subject_dir`. Path separators and `%`
/// are percent-escaped, so distinct keys always get distinct files.
pub fn subject_file_path(subject_dir: &Path, key: &str) -> PathBuf {
    let mut safe = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '%' => safe.push_str("%25"),
            '/' => safe.push_str("%2F"),
            '\\' => safe.push_str("%5C"),
            _ => safe.push(c),
        }
    }
    subject_dir.join(format!("{}.csv", safe))
}

/// Turns one subject's answers into a table with one row per answer.
///
/// `null` entries are skipped. Any other non-object answer, a missing or
/// non-array `answers` field, an answer field that lands on an identity column
/// or on another field's flattened path, or an answer list that yields no rows
/// is an error for the whole subject. With `write_subject_file` set the
/// subject's table is also written to `subject_dir`.
pub fn parse_responses(
    key: &str,
    record: &Value,
    subject_dir: &Path,
    write_subject_file: bool,
) -> Result<Table> {
    let subject = SubjectKey(key);
    let record = record
        .as_object()
        .ok_or_else(|| anyhow!("subject record is not an object"))?;
    let answers = match record.get("answers") {
        Some(Value::Array(answers)) => answers,
        Some(other) => bail!("'answers' is not a list (found {})", json_kind(other)),
        None => bail!("record has no 'answers' field"),
    };

    let mut table = Table::new();
    for (i, answer) in answers.iter().enumerate() {
        let fields = match answer {
            Value::Object(fields) => fields,
            Value::Null => {
                debug!("Skipped empty answer {} @ {}", i, subject.username());
                continue;
            }
            other => bail!("answer {} is not an object (found {})", i, json_kind(other)),
        };

        let mut cells: Vec<(String, String)> = subject
            .identity_cells()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        cells.push(("answer_index".to_string(), i.to_string()));
        flatten(fields, &mut cells);
        table
            .push_row(cells)
            .with_context(|| format!("answer {} has clashing fields", i))?;
    }

    if table.is_empty() {
        bail!("no usable answers among {} entries", answers.len());
    }

    if write_subject_file {
        let path = subject_file_path(subject_dir, key);
        table
            .write_csv(&path)
            .with_context(|| format!("Failed to write subject file for {}", key))?;
        debug!("Wrote {} answers for {} to {}", table.len(), key, path.display());
    }
    Ok(table)
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
