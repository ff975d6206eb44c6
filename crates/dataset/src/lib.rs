//! CSV dataset I/O.
//!
//! Reading yields the header list and one [`Row`] per record. Writing
//! appends the schema's output columns plus `sources` and `error` to the
//! input columns, preserving row-count parity: failed rows appear with
//! empty enrichment fields and their error note, never silently dropped.

use std::path::Path;

use tracing::info;

use rowboat_shared::{OutputSchema, Result, Row, RowOutcome, RowboatError};

/// Read the input dataset. Returns the header names in file order and one
/// row per record.
pub fn read_rows(path: &Path) -> Result<(Vec<String>, Vec<Row>)> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| RowboatError::Dataset(format!("{}: {e}", path.display())))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| RowboatError::Dataset(format!("{}: {e}", path.display())))?
        .iter()
        .map(str::to_string)
        .collect();

    if headers.is_empty() {
        return Err(RowboatError::Dataset(format!(
            "{}: no header row",
            path.display()
        )));
    }

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            RowboatError::Dataset(format!("{}: record {}: {e}", path.display(), index + 1))
        })?;
        let fields = headers
            .iter()
            .zip(record.iter())
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect();
        rows.push(Row::new(index, fields));
    }

    info!(path = %path.display(), rows = rows.len(), "dataset loaded");
    Ok((headers, rows))
}

/// Write the enriched dataset: input columns, then the schema's output
/// columns in declared order, then `sources` and `error`.
///
/// `outcomes` may arrive out of order; rows are written by `row_index`.
/// Every input row must have exactly one outcome.
pub fn write_output(
    path: &Path,
    headers: &[String],
    schema: &OutputSchema,
    rows: &[Row],
    outcomes: &[RowOutcome],
) -> Result<()> {
    if rows.len() != outcomes.len() {
        return Err(RowboatError::Dataset(format!(
            "row/outcome count mismatch: {} rows, {} outcomes",
            rows.len(),
            outcomes.len()
        )));
    }

    let mut by_index: Vec<&RowOutcome> = outcomes.iter().collect();
    by_index.sort_by_key(|o| o.row_index);

    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| RowboatError::Dataset(format!("{}: {e}", path.display())))?;

    let output_columns = schema.column_names();
    let mut header_record: Vec<&str> = headers.iter().map(String::as_str).collect();
    header_record.extend(&output_columns);
    header_record.push("sources");
    header_record.push("error");
    writer
        .write_record(&header_record)
        .map_err(|e| RowboatError::Dataset(e.to_string()))?;

    for (row, outcome) in rows.iter().zip(&by_index) {
        let mut record: Vec<String> = row.fields.iter().map(|(_, v)| v.clone()).collect();

        for column in &output_columns {
            let value = outcome
                .output_fields
                .as_ref()
                .and_then(|fields| fields.get(*column))
                .cloned()
                .unwrap_or_default();
            record.push(value);
        }
        record.push(outcome.sources.join("; "));
        record.push(outcome.error.clone().unwrap_or_default());

        writer
            .write_record(&record)
            .map_err(|e| RowboatError::Dataset(e.to_string()))?;
    }

    writer
        .flush()
        .map_err(|e| RowboatError::io(path, e))?;

    info!(path = %path.display(), rows = rows.len(), "output written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use rowboat_shared::{FieldSpec, FieldType, RowStatus};
    use uuid::Uuid;

    fn temp_csv(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("rowboat_{name}_{}.csv", Uuid::now_v7()));
        std::fs::write(&path, content).expect("write temp csv");
        path
    }

    fn schema() -> OutputSchema {
        OutputSchema {
            fields: vec![
                FieldSpec {
                    name: "industry".into(),
                    kind: FieldType::String,
                    required: true,
                    options: vec![],
                    description: None,
                },
                FieldSpec {
                    name: "employee_count".into(),
                    kind: FieldType::Int,
                    required: false,
                    options: vec![],
                    description: None,
                },
            ],
        }
    }

    fn done_outcome(row_index: usize, industry: &str) -> RowOutcome {
        let mut fields = BTreeMap::new();
        fields.insert("industry".to_string(), industry.to_string());
        RowOutcome {
            row_index,
            status: RowStatus::Done,
            output_fields: Some(fields),
            sources: vec![format!("https://example.com/{row_index}")],
            error: None,
            generate_attempts: 1,
            research_iterations: 1,
            from_cache: false,
        }
    }

    fn failed_outcome(row_index: usize, error: &str) -> RowOutcome {
        RowOutcome {
            row_index,
            status: RowStatus::Failed,
            output_fields: None,
            sources: Vec::new(),
            error: Some(error.to_string()),
            generate_attempts: 0,
            research_iterations: 0,
            from_cache: false,
        }
    }

    #[test]
    fn reads_headers_and_rows() {
        let path = temp_csv("read", "company,country\nAcme,NL\nGlobex,US\n");
        let (headers, rows) = read_rows(&path).expect("read");

        assert_eq!(headers, vec!["company", "country"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].index, 0);
        assert_eq!(rows[0].get("company"), Some("Acme"));
        assert_eq!(rows[1].get("country"), Some("US"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn quoted_fields_survive() {
        let path = temp_csv("quoted", "company,notes\n\"Acme, Inc.\",\"says \"\"hi\"\"\"\n");
        let (_, rows) = read_rows(&path).expect("read");
        assert_eq!(rows[0].get("company"), Some("Acme, Inc."));
        assert_eq!(rows[0].get("notes"), Some("says \"hi\""));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_a_dataset_error() {
        let err = read_rows(Path::new("/nonexistent/input.csv")).unwrap_err();
        assert!(matches!(err, RowboatError::Dataset(_)));
    }

    #[test]
    fn output_preserves_row_parity_and_appends_columns() {
        let input = temp_csv("in", "company,country\nAcme,NL\nGlobex,US\nInitech,DE\n");
        let (headers, rows) = read_rows(&input).expect("read");

        // Out-of-order outcomes with a failure in the middle
        let outcomes = vec![
            done_outcome(2, "Manufacturing"),
            failed_outcome(1, "search error: fake permanent failure"),
            done_outcome(0, "SaaS"),
        ];

        let output = std::env::temp_dir().join(format!("rowboat_out_{}.csv", Uuid::now_v7()));
        write_output(&output, &headers, &schema(), &rows, &outcomes).expect("write");

        let written = std::fs::read_to_string(&output).expect("read back");
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 4); // header + 3 rows, parity preserved
        assert_eq!(
            lines[0],
            "company,country,industry,employee_count,sources,error"
        );
        assert!(lines[1].starts_with("Acme,NL,SaaS,"));
        assert!(lines[1].contains("https://example.com/0"));
        // Failed row: empty enrichment fields, error note attached
        assert!(lines[2].starts_with("Globex,US,,,,"));
        assert!(lines[2].contains("fake permanent failure"));
        assert!(lines[3].starts_with("Initech,DE,Manufacturing,"));

        let _ = std::fs::remove_file(&input);
        let _ = std::fs::remove_file(&output);
    }

    #[test]
    fn outcome_count_mismatch_rejected() {
        let input = temp_csv("mismatch", "company\nAcme\nGlobex\n");
        let (headers, rows) = read_rows(&input).expect("read");

        let output = std::env::temp_dir().join(format!("rowboat_out_{}.csv", Uuid::now_v7()));
        let err = write_output(&output, &headers, &schema(), &rows, &[done_outcome(0, "SaaS")])
            .unwrap_err();
        assert!(err.to_string().contains("mismatch"));

        let _ = std::fs::remove_file(&input);
    }

    #[test]
    fn multiple_sources_joined() {
        let input = temp_csv("sources", "company\nAcme\n");
        let (headers, rows) = read_rows(&input).expect("read");

        let mut outcome = done_outcome(0, "SaaS");
        outcome.sources = vec![
            "https://a.example".into(),
            "https://b.example".into(),
        ];

        let output = std::env::temp_dir().join(format!("rowboat_out_{}.csv", Uuid::now_v7()));
        write_output(&output, &headers, &schema(), &rows, &[outcome]).expect("write");

        let written = std::fs::read_to_string(&output).expect("read back");
        assert!(written.contains("https://a.example; https://b.example"));

        let _ = std::fs::remove_file(&input);
        let _ = std::fs::remove_file(&output);
    }
}
