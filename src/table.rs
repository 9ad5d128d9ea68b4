use crate::error::RipError;
use anyhow::{bail, Context, Result};
use csv::Writer;
use log::{debug, warn};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// A column-ordered table of string cells, the unit every parser hands back
/// and the aggregation stage concatenates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell lookup by column name; `None` if the column is unknown.
    #[cfg(test)]
    pub(crate) fn get(&self, row: usize, column: &str) -> Option<&str> {
        let col = *self.index.get(column)?;
        self.rows.get(row).map(|r| r.get(col).map_or("", String::as_str))
    }

    fn column_position(&mut self, name: &str) -> usize {
        if let Some(&pos) = self.index.get(name) {
            return pos;
        }
        let pos = self.columns.len();
        self.columns.push(name.to_string());
        self.index.insert(name.to_string(), pos);
        pos
    }

    /// Appends a row given as (column, value) pairs. Unseen columns are added
    /// at the end; cells of columns the row does not mention stay empty.
    /// Naming the same column twice is an error and leaves the table as it was.
    pub fn push_row<I, K>(&mut self, cells: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, String)>,
        K: AsRef<str>,
    {
        let cells: Vec<(K, String)> = cells.into_iter().collect();
        {
            let mut seen = HashSet::new();
            for (name, _) in &cells {
                if !seen.insert(name.as_ref()) {
                    bail!("column '{}' appears more than once in a row", name.as_ref());
                }
            }
        }
        self.append_row(cells);
        Ok(())
    }

    fn append_row<I, K>(&mut self, cells: I)
    where
        I: IntoIterator<Item = (K, String)>,
        K: AsRef<str>,
    {
        let mut row = vec![String::new(); self.columns.len()];
        for (name, value) in cells {
            let pos = self.column_position(name.as_ref());
            if pos >= row.len() {
                row.resize(pos + 1, String::new());
            }
            row[pos] = value;
        }
        self.rows.push(row);
    }

    /// Stacks `tables` in order. Columns are the union in first-seen order.
    pub fn concat(tables: &[Table], pass: &'static str) -> Result<Table, RipError> {
        if tables.is_empty() {
            return Err(RipError::NoObjectsToConcatenate { pass });
        }
        let mut combined = Table::new();
        for table in tables {
            for row in &table.rows {
                // Source columns are unique, so no row can repeat one.
                combined.append_row(
                    table
                        .columns
                        .iter()
                        .zip(row.iter())
                        .map(|(name, value)| (name.as_str(), value.clone())),
                );
            }
            // A table with columns but no rows still contributes its header.
            for name in &table.columns {
                combined.column_position(name);
            }
        }
        Ok(combined)
    }

    /// Writes the table as comma-separated UTF-8 with a byte-order mark, one
    /// header row and no index column.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory structure for: {}", path.display()))?;
        }
        let mut file = File::create(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        file.write_all(UTF8_BOM)
            .with_context(|| format!("Failed to write byte-order mark to: {}", path.display()))?;

        let mut writer = Writer::from_writer(file);
        writer
            .write_record(&self.columns)
            .with_context(|| format!("Failed to write header to: {}", path.display()))?;
        let width = self.columns.len();
        for row in &self.rows {
            if row.len() < width {
                let mut padded = row.clone();
                padded.resize(width, String::new());
                writer.write_record(&padded)?;
            } else {
                writer.write_record(row)?;
            }
        }
        writer
            .flush()
            .with_context(|| format!("Failed to flush output file: {}", path.display()))?;
        debug!("Wrote {} rows to {}", self.rows.len(), path.display());
        Ok(())
    }
}

/// Renders a scalar JSON value as a CSV cell.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => serde_json::to_string(value).unwrap_or_else(|e| {
            warn!("Failed to serialize complex value: {}", e);
            "[serialization error]".to_string()
        }),
    }
}

/// Flattens a record's fields into (path, cell) pairs. Nested object keys are
/// joined with `.`, array elements get an `[i]` suffix.
pub fn flatten(fields: &Map<String, Value>, out: &mut Vec<(String, String)>) {
    for (key, value) in fields {
        flatten_value(key.clone(), value, out);
    }
}

fn flatten_value(path: String, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(obj) if !obj.is_empty() => {
            for (key, child) in obj {
                flatten_value(format!("{}.{}", path, key), child, out);
            }
        }
        Value::Array(arr) if !arr.is_empty() => {
            for (i, child) in arr.iter().enumerate() {
                flatten_value(format!("{}[{}]", path, i), child, out);
            }
        }
        _ => out.push((path, cell_text(value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn table(rows: &[&[(&str, &str)]]) -> Table {
        let mut t = Table::new();
        for row in rows {
            t.push_row(row.iter().map(|(k, v)| (*k, v.to_string()))).unwrap();
        }
        t
    }

    #[test]
    fn push_row_fills_unmentioned_columns() {
        let t = table(&[&[("a", "1")], &[("b", "2")]]);
        assert_eq!(t.columns(), ["a", "b"]);
        assert_eq!(t.get(0, "b"), Some(""));
        assert_eq!(t.get(1, "a"), Some(""));
        assert_eq!(t.get(1, "b"), Some("2"));
        assert_eq!(t.get(0, "missing"), None);
    }

    #[test]
    fn concat_unions_columns_in_first_seen_order() {
        let first = table(&[&[("user", "alice"), ("q", "1")]]);
        let second = table(&[&[("user", "carol"), ("mood", "ok")], &[("user", "carol"), ("q", "3")]]);

        let combined = Table::concat(&[first, second], "response").unwrap();
        assert_eq!(combined.columns(), ["user", "q", "mood"]);
        assert_eq!(combined.len(), 3);
        assert_eq!(combined.get(0, "user"), Some("alice"));
        assert_eq!(combined.get(1, "q"), Some(""));
        assert_eq!(combined.get(2, "q"), Some("3"));
    }

    #[test]
    fn concat_of_nothing_fails() {
        let err = Table::concat(&[], "device").unwrap_err();
        assert_eq!(err.to_string(), "no objects to concatenate (device pass)");
    }

    #[test]
    fn flatten_joins_nested_paths() {
        let fields = json!({"q": 1, "meta": {"tz": "PST", "ok": true}, "choices": ["a", "b"], "skip": null, "empty": []});
        let mut cells = Vec::new();
        flatten(fields.as_object().unwrap(), &mut cells);
        assert_eq!(
            cells,
            vec![
                ("q".to_string(), "1".to_string()),
                ("meta.tz".to_string(), "PST".to_string()),
                ("meta.ok".to_string(), "true".to_string()),
                ("choices[0]".to_string(), "a".to_string()),
                ("choices[1]".to_string(), "b".to_string()),
                ("skip".to_string(), String::new()),
                ("empty".to_string(), "[]".to_string()),
            ]
        );
    }

    #[test]
    fn flatten_keeps_empty_key_segments() {
        let fields = json!({"": {"x": 1}, "x": 2});
        let mut cells = Vec::new();
        flatten(fields.as_object().unwrap(), &mut cells);
        assert_eq!(
            cells,
            vec![(".x".to_string(), "1".to_string()), ("x".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn repeated_column_in_a_row_is_rejected() {
        let mut t = table(&[&[("a", "1")]]);
        let err = t
            .push_row([("a", "2".to_string()), ("b", "3".to_string()), ("a", "4".to_string())])
            .unwrap_err();
        assert_eq!(err.to_string(), "column 'a' appears more than once in a row");
        assert_eq!(t.len(), 1);
        assert_eq!(t.columns(), ["a"]);
    }

    #[test]
    fn csv_starts_with_bom_and_has_no_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("out.csv");
        let t = table(&[&[("user", "alice"), ("text", "hi, there")], &[("user", "bob")]]);
        t.write_csv(&path).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        let text = String::from_utf8(bytes[UTF8_BOM.len()..].to_vec()).unwrap();
        assert_eq!(text, "user,text\nalice,\"hi, there\"\nbob,\n");
    }
}
