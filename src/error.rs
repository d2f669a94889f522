use std::{fmt, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidFieldValue,
    TableAlreadyExists,
    FileAlreadyExists,
    TableDoesNotExist,
    InvalidTableSet,
    UnexpectedError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidFieldValue => "INVALID_FIELD_VALUE",
            ErrorKind::TableAlreadyExists => "TABLE_ALREADY_EXISTS",
            ErrorKind::FileAlreadyExists => "FILE_ALREADY_EXISTS",
            ErrorKind::TableDoesNotExist => "TABLE_DOES_NOT_EXIST",
            ErrorKind::InvalidTableSet => "INVALID_TABLE_SET",
            ErrorKind::UnexpectedError => "UNEXPECTED_ERROR",
        }
    }

    /// Batch-fatal kinds abort ingestion; everything else is recorded and skipped.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, ErrorKind::InvalidTableSet | ErrorKind::UnexpectedError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid operation: {0}")]
    InvalidOperation(&'static str),
    #[error("Invalid value for '{column}': {message}")]
    InvalidFieldValue { column: String, message: String },
    #[error("Table '{0}' already exists")]
    TableAlreadyExists(String),
    #[error("File '{0}' already exists")]
    FileAlreadyExists(String),
    #[error("Table '{0}' does not exist")]
    TableDoesNotExist(String),
    #[error("Invalid table set: {0}")]
    InvalidTableSet(String),
    #[error("Unexpected error: {0}")]
    Unexpected(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    pub fn invalid_field(column: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidFieldValue {
            column: column.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidFieldValue { .. } => ErrorKind::InvalidFieldValue,
            Error::TableAlreadyExists(_) => ErrorKind::TableAlreadyExists,
            Error::FileAlreadyExists(_) => ErrorKind::FileAlreadyExists,
            Error::TableDoesNotExist(_) => ErrorKind::TableDoesNotExist,
            Error::InvalidTableSet(_) => ErrorKind::InvalidTableSet,
            Error::InvalidOperation(_) | Error::Unexpected(_) | Error::Io(_) | Error::Csv(_) => {
                ErrorKind::UnexpectedError
            }
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// One recorded problem from an ingestion batch.
///
/// Row and column indices are zero-based over data rows and physical columns;
/// table-level problems leave them unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileProcessingError {
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    pub row_index: Option<usize>,
    pub column_index: Option<usize>,
    pub column_name: Option<String>,
    pub column_value: Option<String>,
    pub error_type: ErrorKind,
    pub message: String,
}

impl FileProcessingError {
    pub fn new(kind: ErrorKind, file_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            table_name: None,
            row_index: None,
            column_index: None,
            column_name: None,
            column_value: None,
            error_type: kind,
            message: message.into(),
        }
    }

    pub fn from_error(file_name: impl Into<String>, error: &Error) -> Self {
        let mut record = Self::new(error.kind(), file_name, error.to_string());
        if let Error::InvalidFieldValue { column, .. } = error {
            record.column_name = Some(column.clone());
        }
        record
    }

    pub fn with_table(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn at_row(mut self, row_index: usize) -> Self {
        self.row_index = Some(row_index);
        self
    }

    pub fn at_column(mut self, column_index: usize, column_name: impl Into<String>) -> Self {
        self.column_index = Some(column_index);
        self.column_name = Some(column_name.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.column_value = Some(value.into());
        self
    }

    pub fn is_batch_fatal(&self) -> bool {
        self.error_type.is_batch_fatal()
    }
}

impl fmt::Display for FileProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error_type, self.file_name)?;
        if let Some(row) = self.row_index {
            write!(f, " row {}", row + 1)?;
        }
        if let Some(column) = &self.column_name {
            write!(f, " column '{column}'")?;
        }
        write!(f, ": {}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_in_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorKind::InvalidTableSet).unwrap();
        assert_eq!(json, "\"INVALID_TABLE_SET\"");
        let parsed: ErrorKind = serde_json::from_str("\"FILE_ALREADY_EXISTS\"").unwrap();
        assert_eq!(parsed, ErrorKind::FileAlreadyExists);
    }

    #[test]
    fn only_table_set_and_unexpected_are_batch_fatal() {
        assert!(ErrorKind::InvalidTableSet.is_batch_fatal());
        assert!(ErrorKind::UnexpectedError.is_batch_fatal());
        assert!(!ErrorKind::InvalidFieldValue.is_batch_fatal());
        assert!(!ErrorKind::TableAlreadyExists.is_batch_fatal());
    }

    #[test]
    fn from_error_carries_column_of_field_errors() {
        let error = Error::invalid_field("total", "expected a number");
        let record = FileProcessingError::from_error("orders.csv", &error);
        assert_eq!(record.error_type, ErrorKind::InvalidFieldValue);
        assert_eq!(record.column_name.as_deref(), Some("total"));
        assert!(record.message.contains("expected a number"));
    }

    #[test]
    fn display_uses_one_based_rows() {
        let record = FileProcessingError::new(ErrorKind::InvalidFieldValue, "a.csv", "bad")
            .at_row(0)
            .at_column(2, "when");
        assert_eq!(record.to_string(), "[INVALID_FIELD_VALUE] a.csv row 1 column 'when': bad");
    }
}
