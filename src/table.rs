//! Column-oriented tabular data and its CSV rendering for bulk imports.

use std::io::Write;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("row has {got} cells but the table has {expected} columns")]
    WidthMismatch { expected: usize, got: usize },

    #[error("record {index} is not a JSON object")]
    NotAnObject { index: usize },

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// CSV rendering options.
#[derive(Debug, Clone)]
pub struct CsvOptions {
    /// Written in place of missing (`null`) cells.
    pub null_token: String,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            null_token: String::new(),
        }
    }
}

/// A header plus rows of JSON cells; `null` marks a missing value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::WidthMismatch {
                expected: self.columns.len(),
                got: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Build a table from serializable records. Columns are the union of all
    /// object keys in first-seen order; absent keys become missing cells.
    pub fn from_records<T: Serialize>(records: &[T]) -> Result<Self, TableError> {
        let mut objects = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            match serde_json::to_value(record)? {
                Value::Object(map) => objects.push(map),
                _ => return Err(TableError::NotAnObject { index }),
            }
        }

        let mut columns: Vec<String> = Vec::new();
        for object in &objects {
            for key in object.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = objects
            .into_iter()
            .map(|mut object| {
                columns
                    .iter()
                    .map(|c| object.remove(c).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Ok(Self { columns, rows })
    }

    /// Write the header and every row, quoting all fields.
    pub fn write_csv<W: Write>(&self, out: W, options: &CsvOptions) -> Result<(), TableError> {
        let mut writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Always)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(out);

        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|cell| cell_text(cell, &options.null_token)))?;
        }
        writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }

    pub fn to_csv_string(&self, options: &CsvOptions) -> Result<String, TableError> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf, options)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

fn cell_text(cell: &Value, null_token: &str) -> String {
    match cell {
        Value::Null => null_token.to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_cell_uses_null_token_and_all_fields_quoted() {
        let mut table = Table::new(["id", "gene", "score"]);
        table.push_row(vec![json!("p1"), Value::Null, json!(0.5)]).unwrap();

        let csv = table.to_csv_string(&CsvOptions::default()).unwrap();
        assert_eq!(csv, "\"id\",\"gene\",\"score\"\n\"p1\",\"\",\"0.5\"\n");

        let csv = table
            .to_csv_string(&CsvOptions {
                null_token: "NA".to_string(),
            })
            .unwrap();
        assert_eq!(csv.lines().nth(1), Some("\"p1\",\"NA\",\"0.5\""));
    }

    #[test]
    fn test_embedded_quotes_are_escaped() {
        let mut table = Table::new(["comment"]);
        table.push_row(vec![json!("said \"hi\", left")]).unwrap();

        let csv = table.to_csv_string(&CsvOptions::default()).unwrap();
        assert_eq!(csv, "\"comment\"\n\"said \"\"hi\"\", left\"\n");
    }

    #[test]
    fn test_push_row_rejects_wrong_width() {
        let mut table = Table::new(["a", "b"]);
        let err = table.push_row(vec![json!(1)]).unwrap_err();
        assert!(matches!(
            err,
            TableError::WidthMismatch {
                expected: 2,
                got: 1
            }
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn test_from_records_unions_columns() {
        let records = vec![
            json!({ "id": "a", "gene": "BRCA1" }),
            json!({ "id": "b", "hgvs": "c.68_69del" }),
        ];
        let table = Table::from_records(&records).unwrap();

        assert_eq!(table.columns(), ["id", "gene", "hgvs"]);

        let col = |name: &str| table.columns().iter().position(|c| c == name).unwrap();
        assert_eq!(table.rows()[0][col("hgvs")], Value::Null);
        assert_eq!(table.rows()[1][col("gene")], Value::Null);
        assert_eq!(table.rows()[1][col("hgvs")], json!("c.68_69del"));
    }

    #[test]
    fn test_from_records_keeps_struct_field_order() {
        #[derive(Serialize)]
        struct Row {
            id: &'static str,
            gene: &'static str,
            analysis: u64,
        }

        let table = Table::from_records(&[Row {
            id: "v1",
            gene: "BRCA1",
            analysis: 42,
        }])
        .unwrap();

        assert_eq!(table.columns(), ["id", "gene", "analysis"]);
        let csv = table.to_csv_string(&CsvOptions::default()).unwrap();
        assert!(csv.starts_with("\"id\",\"gene\",\"analysis\"\n"));
    }

    #[test]
    fn test_from_records_rejects_scalars() {
        let err = Table::from_records(&[1, 2]).unwrap_err();
        assert!(matches!(err, TableError::NotAnObject { index: 0 }));
    }

    #[test]
    fn test_header_only_for_empty_table() {
        let table = Table::new(["id"]);
        let csv = table.to_csv_string(&CsvOptions::default()).unwrap();
        assert_eq!(csv, "\"id\"\n");
    }
}
