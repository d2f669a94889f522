use std::{io::Read, path::Path};

use encoding_rs::{Encoding, UTF_8};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    column_name::{normalize_column_name, normalize_headers},
    error::{Error, ErrorKind, FileProcessingError, Result},
    field_type::{ColumnDefinition, ColumnInference},
    io_utils::{self, MeteredReader},
};

const MAX_RECORDED_ERRORS_PER_FILE: usize = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
    pub file_name: String,
    pub table_name: String,
    pub number_of_rows: usize,
    pub number_of_columns: usize,
    pub columns: Vec<ColumnDefinition>,
    pub file_size: u64,
}

impl FileStats {
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Outcome of reading one file: the stats plus any per-cell problems.
#[derive(Debug, Clone)]
pub struct FileStatsReport {
    pub stats: FileStats,
    pub errors: Vec<FileProcessingError>,
    pub suppressed_errors: usize,
}

/// Table name for an uploaded file: the normalized, lower-cased file stem.
pub fn table_name_for_file(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    let normalized = normalize_column_name(stem.trim()).to_ascii_lowercase();
    if normalized.is_empty() {
        "table".to_string()
    } else {
        normalized
    }
}

#[derive(Debug, Clone)]
pub struct FileStatsBuilder {
    file_name: String,
    table_name: String,
    delimiter: Option<u8>,
    encoding: &'static Encoding,
}

impl FileStatsBuilder {
    pub fn new(file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        let table_name = table_name_for_file(&file_name);
        Self {
            file_name,
            table_name,
            delimiter: None,
            encoding: UTF_8,
        }
    }

    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn delimiter(mut self, delimiter: Option<u8>) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn build<R: Read>(&self, source: R) -> Result<FileStatsReport> {
        let metered = MeteredReader::new(source);
        let counter = metered.counter();
        let delimiter = io_utils::resolve_input_delimiter(&self.file_name, self.delimiter);
        let mut reader = io_utils::open_csv_reader(metered, delimiter);

        let header_record = reader.byte_headers()?.clone();
        if header_record.is_empty() {
            return Err(Error::Unexpected(format!(
                "File '{}' does not contain a header row",
                self.file_name
            )));
        }
        let headers: Vec<String> = io_utils::decode_headers(&header_record, self.encoding)?
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect();
        let names = normalize_headers(&headers);

        let mut inferences = vec![ColumnInference::new(); headers.len()];
        let mut errors = ErrorSink::new(&self.file_name, &self.table_name);
        let mut record = csv::ByteRecord::new();
        let mut rows = 0usize;

        while reader.read_byte_record(&mut record)? {
            let row_idx = rows;
            rows += 1;
            if record.len() > headers.len() {
                errors.push(
                    FileProcessingError::new(
                        ErrorKind::InvalidFieldValue,
                        &self.file_name,
                        format!(
                            "Row has {} field(s) but the header declares {}; extra fields ignored",
                            record.len(),
                            headers.len()
                        ),
                    )
                    .at_row(row_idx),
                );
            }
            for (col_idx, field) in record.iter().take(headers.len()).enumerate() {
                if field.is_empty() {
                    continue;
                }
                let Some(value) = io_utils::decode_bytes(field, self.encoding) else {
                    errors.push(
                        FileProcessingError::new(
                            ErrorKind::InvalidFieldValue,
                            &self.file_name,
                            format!("Value is not valid {} text", self.encoding.name()),
                        )
                        .at_row(row_idx)
                        .at_column(col_idx, &names[col_idx]),
                    );
                    continue;
                };
                if let Some(rejected) = inferences[col_idx].observe(&value) {
                    errors.push(
                        FileProcessingError::new(
                            ErrorKind::InvalidFieldValue,
                            &self.file_name,
                            rejected.message,
                        )
                        .at_row(row_idx)
                        .at_column(col_idx, &names[col_idx])
                        .with_value(value),
                    );
                }
            }
        }
        drop(reader);

        let columns: Vec<ColumnDefinition> = inferences
            .iter()
            .zip(names)
            .zip(headers)
            .map(|((inference, name), original)| inference.finish(name, original))
            .collect();
        debug!(
            "'{}': {} row(s), {} column(s), types [{}]",
            self.file_name,
            rows,
            columns.len(),
            columns
                .iter()
                .map(|c| format!("{}={}", c.name, c.field_type))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let (errors, suppressed_errors) = errors.finish();
        Ok(FileStatsReport {
            stats: FileStats {
                file_name: self.file_name.clone(),
                table_name: self.table_name.clone(),
                number_of_rows: rows,
                number_of_columns: columns.len(),
                columns,
                file_size: counter.get(),
            },
            errors,
            suppressed_errors,
        })
    }
}

struct ErrorSink<'a> {
    file_name: &'a str,
    table_name: &'a str,
    recorded: Vec<FileProcessingError>,
    suppressed: usize,
}

impl<'a> ErrorSink<'a> {
    fn new(file_name: &'a str, table_name: &'a str) -> Self {
        Self {
            file_name,
            table_name,
            recorded: Vec::new(),
            suppressed: 0,
        }
    }

    fn push(&mut self, error: FileProcessingError) {
        if self.recorded.len() >= MAX_RECORDED_ERRORS_PER_FILE {
            self.suppressed += 1;
            return;
        }
        self.recorded.push(error.with_table(self.table_name));
    }

    fn finish(self) -> (Vec<FileProcessingError>, usize) {
        if self.suppressed > 0 {
            warn!(
                "'{}': {} further value error(s) not recorded",
                self.file_name, self.suppressed
            );
        }
        (self.recorded, self.suppressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_type::FieldType;
    use encoding_rs::WINDOWS_1252;
    use std::io::Cursor;

    fn build(name: &str, contents: &str) -> FileStatsReport {
        FileStatsBuilder::new(name)
            .build(Cursor::new(contents.as_bytes().to_vec()))
            .expect("build stats")
    }

    #[test]
    fn derives_table_name_from_file_stem() {
        assert_eq!(table_name_for_file("Orders 2024.csv"), "orders_2024");
        assert_eq!(table_name_for_file("nested/path/Customers.CSV"), "customers");
        assert_eq!(table_name_for_file("%%%.csv"), "table");
    }

    #[test]
    fn counts_rows_columns_and_bytes() {
        let contents = "order_id,customer_id,total\n1,10,5.5\n2,11,7\n";
        let report = build("orders.csv", contents);
        let stats = report.stats;
        assert_eq!(stats.table_name, "orders");
        assert_eq!(stats.number_of_rows, 2);
        assert_eq!(stats.number_of_columns, 3);
        assert_eq!(stats.file_size, contents.len() as u64);
        assert_eq!(stats.columns[2].field_type, FieldType::Number);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn header_only_file_yields_unknown_columns() {
        let stats = build("empty.csv", "a,b\n").stats;
        assert_eq!(stats.number_of_rows, 0);
        assert!(stats.columns.iter().all(|c| c.field_type == FieldType::Unknown));
    }

    #[test]
    fn completely_empty_stream_is_unexpected() {
        let err = FileStatsBuilder::new("blank.csv")
            .build(Cursor::new(Vec::new()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedError);
    }

    #[test]
    fn invalid_dates_are_recorded_with_position() {
        let report = build("events.csv", "when,label\n2023-01-01,a\n2023-13-40,b\n");
        assert_eq!(report.stats.columns[0].field_type, FieldType::String);
        assert_eq!(report.errors.len(), 1);
        let error = &report.errors[0];
        assert_eq!(error.error_type, ErrorKind::InvalidFieldValue);
        assert_eq!(error.row_index, Some(1));
        assert_eq!(error.column_index, Some(0));
        assert_eq!(error.column_value.as_deref(), Some("2023-13-40"));
        assert_eq!(error.table_name.as_deref(), Some("events"));
    }

    #[test]
    fn ragged_rows_are_recorded_not_fatal() {
        let report = build("ragged.csv", "a,b\n1,2,3\n4\n");
        assert_eq!(report.stats.number_of_rows, 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].row_index, Some(0));
    }

    #[test]
    fn headers_are_normalized_and_originals_kept() {
        let stats = build("t.csv", " Unit Price ,Unit-Price\n1,2\n").stats;
        assert_eq!(stats.columns[0].name, "Unit_Price");
        assert_eq!(stats.columns[0].original_name, "Unit Price");
        assert_eq!(stats.columns[1].name, "Unit_Price_1");
    }

    #[test]
    fn decodes_configured_encoding() {
        let (encoded, _, _) = WINDOWS_1252.encode("name\nCaf\u{e9}\n");
        let stats = FileStatsBuilder::new("latin.csv")
            .encoding(WINDOWS_1252)
            .build(Cursor::new(encoded.into_owned()))
            .expect("build stats")
            .stats;
        assert_eq!(stats.columns[0].longest_string, Some(4));
    }

    #[test]
    fn undecodable_cells_are_recorded() {
        let report = FileStatsBuilder::new("bad.csv")
            .build(Cursor::new(b"name\ncaf\xe9\n".to_vec()))
            .expect("build stats");
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.stats.columns[0].field_type, FieldType::Unknown);
    }
}
