//! Storage names and object keys for ingested tables.
//!
//! Layout, all lower-cased:
//!
//! ```text
//! {workspace}_{model}_{table}                                table
//! {workspace}_{model}_view                                   view
//! {workspace}/{model}/input/{table}/{file}                   csv landing key
//! {workspace}/{model}/data/{table}/{file}.parquet            columnar data key
//! {workspace}/{model}/archive/{millis}/{area}/{table}/{file}  archived object
//! ```

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

const INPUT_AREA: &str = "input";
const DATA_AREA: &str = "data";
const ARCHIVE_AREA: &str = "archive";
const PARQUET_SUFFIX: &str = ".parquet";

pub fn table_name(workspace_id: &str, model_id: &str, table: &str) -> String {
    format!("{workspace_id}_{model_id}_{table}").to_ascii_lowercase()
}

pub fn view_name(workspace_id: &str, model_id: &str) -> String {
    format!("{workspace_id}_{model_id}_view").to_ascii_lowercase()
}

fn segment<'a>(label: &str, value: &'a str) -> Result<&'a str> {
    if value.is_empty() || value == "." || value == ".." || value.contains('/') {
        return Err(Error::Unexpected(format!(
            "Invalid {label} path segment '{value}'"
        )));
    }
    Ok(value)
}

pub fn table_csv_path(workspace_id: &str, model_id: &str, table: &str, file_name: &str) -> Result<String> {
    Ok(format!(
        "{}/{}/{INPUT_AREA}/{}/{}",
        segment("workspace", workspace_id)?,
        segment("model", model_id)?,
        segment("table", table)?,
        segment("file", file_name)?
    )
    .to_ascii_lowercase())
}

/// Directory that holds every columnar object of one table.
pub fn table_data_prefix(workspace_id: &str, model_id: &str, table: &str) -> Result<String> {
    Ok(format!(
        "{}/{}/{DATA_AREA}/{}/",
        segment("workspace", workspace_id)?,
        segment("model", model_id)?,
        segment("table", table)?
    )
    .to_ascii_lowercase())
}

pub fn table_parquet_path(
    workspace_id: &str,
    model_id: &str,
    table: &str,
    file_name: &str,
) -> Result<String> {
    let prefix = table_data_prefix(workspace_id, model_id, table)?;
    Ok(format!(
        "{prefix}{}{PARQUET_SUFFIX}",
        segment("file", file_name)?.to_ascii_lowercase()
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageArea {
    Input,
    Data,
}

impl StorageArea {
    fn as_str(&self) -> &'static str {
        match self {
            StorageArea::Input => INPUT_AREA,
            StorageArea::Data => DATA_AREA,
        }
    }
}

/// The pieces encoded into an object key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    pub workspace_id: String,
    pub model_id: String,
    pub area: StorageArea,
    pub table: String,
    pub file_name: String,
    pub archived_at_millis: Option<i64>,
}

impl ObjectKey {
    pub fn parse(key: &str) -> Result<Self> {
        let invalid = || Error::Unexpected(format!("'{key}' is not a recognised object key"));
        let parts: Vec<&str> = key.trim_start_matches('/').split('/').collect();
        let (workspace, model, rest) = match parts.as_slice() {
            [workspace, model, rest @ ..] => (*workspace, *model, rest),
            _ => return Err(invalid()),
        };
        let (archived_at_millis, area, table, object) = match rest {
            [area, table, object] => (None, *area, *table, *object),
            [ARCHIVE_AREA, millis, area, table, object] => {
                let millis: i64 = millis.parse().map_err(|_| invalid())?;
                (Some(millis), *area, *table, *object)
            }
            _ => return Err(invalid()),
        };
        let (area, file_name) = match area {
            INPUT_AREA => (StorageArea::Input, object),
            DATA_AREA => (
                StorageArea::Data,
                object.strip_suffix(PARQUET_SUFFIX).ok_or_else(invalid)?,
            ),
            _ => return Err(invalid()),
        };
        for (label, value) in [
            ("workspace", workspace),
            ("model", model),
            ("table", table),
            ("file", file_name),
        ] {
            segment(label, value)?;
        }
        Ok(Self {
            workspace_id: workspace.to_string(),
            model_id: model.to_string(),
            area,
            table: table.to_string(),
            file_name: file_name.to_string(),
            archived_at_millis,
        })
    }

    pub fn object_name(&self) -> String {
        match self.area {
            StorageArea::Input => self.file_name.clone(),
            StorageArea::Data => format!("{}{PARQUET_SUFFIX}", self.file_name),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/", self.workspace_id, self.model_id)?;
        if let Some(millis) = self.archived_at_millis {
            write!(f, "{ARCHIVE_AREA}/{millis}/")?;
        }
        write!(f, "{}/{}/{}", self.area.as_str(), self.table, self.object_name())
    }
}

/// Archive location for an existing input or data object, keyed by time.
pub fn archive_file_path(key: &str, archived_at: DateTime<Utc>) -> Result<String> {
    let mut parsed = ObjectKey::parse(key)?;
    parsed.archived_at_millis = Some(archived_at.timestamp_millis());
    Ok(parsed.to_string().to_ascii_lowercase())
}
