use crate::responses::json_kind;
use crate::subject::SubjectKey;
use crate::table::{flatten, Table};
use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Value};

/// Extracts the subject's device metadata. `device` may be a single object
/// (one row) or a list of objects (one row each).
pub fn parse_device_info(key: &str, record: &Value) -> Result<Table> {
    let subject = SubjectKey(key);
    let device = record
        .get("device")
        .ok_or_else(|| anyhow!("record has no 'device' field"))?;

    let entries: Vec<&Map<String, Value>> = match device {
        Value::Object(obj) => vec![obj],
        Value::Array(list) if list.is_empty() => bail!("'device' list is empty"),
        Value::Array(list) => list
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                entry
                    .as_object()
                    .ok_or_else(|| anyhow!("device entry {} is not an object (found {})", i, json_kind(entry)))
            })
            .collect::<Result<_>>()?,
        other => bail!("'device' is not an object (found {})", json_kind(other)),
    };

    let mut table = Table::new();
    for (i, entry) in entries.into_iter().enumerate() {
        let mut cells: Vec<(String, String)> = subject
            .identity_cells()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        flatten(entry, &mut cells);
        table
            .push_row(cells)
            .with_context(|| format!("device entry {} has clashing fields", i))?;
    }
    Ok(table)
}
