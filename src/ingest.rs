//! Batch ingestion: stats for every uploaded file, file operations against
//! the previously published tables, then sort, join planning, view planning
//! and table DDL.
//!
//! Stats are built in parallel. Everything after that runs on the calling
//! thread. Per-cell and per-file problems land in `fileProcessingErrors`;
//! batch-fatal problems end the batch with a failed result that carries no
//! join information, view name or statements.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    io::{self, Read},
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use clap::ValueEnum;
use encoding_rs::{Encoding, UTF_8};
use itertools::Itertools;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    config::{DEFAULT_BUCKET, IngestConfig},
    error::{Error, ErrorKind, FileProcessingError, Result},
    field_type::{ColumnDefinition, FieldType},
    file_stats::{FileStats, FileStatsBuilder, table_name_for_file},
    io_utils,
    join::{JoinOptions, JoinTableDefinition, JoinTablePlanner},
    paths, table_ddl,
    table_sorter::TableSorter,
    view::{JoinKind, ViewDefinition, ViewQueryPlanner},
};

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, ValueEnum,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[value(rename_all = "kebab-case")]
pub enum FileOperation {
    #[default]
    Add,
    Append,
    Replace,
    Delete,
}

/// One uploaded file: a declared name, an operation and an unread byte stream.
pub struct RawFile {
    pub file_name: String,
    pub operation: FileOperation,
    /// Target table; defaults to the normalized file stem.
    pub table_name: Option<String>,
    reader: Box<dyn Read + Send>,
}

impl RawFile {
    pub fn new(file_name: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self {
            file_name: file_name.into(),
            operation: FileOperation::Add,
            table_name: None,
            reader: Box::new(reader),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::Unexpected(format!("'{}' has no usable file name", path.display())))?
            .to_string();
        Ok(Self::new(file_name, io_utils::open_file(path)?))
    }

    /// A delete request; the table is named by the file and nothing is read.
    pub fn delete(file_name: impl Into<String>) -> Self {
        Self::new(file_name, io::empty()).with_operation(FileOperation::Delete)
    }

    pub fn with_operation(mut self, operation: FileOperation) -> Self {
        self.operation = operation;
        self
    }

    pub fn with_table(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    fn target_table(&self) -> String {
        self.table_name
            .clone()
            .unwrap_or_else(|| table_name_for_file(&self.file_name))
    }
}

impl fmt::Debug for RawFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFile")
            .field("file_name", &self.file_name)
            .field("operation", &self.operation)
            .field("table_name", &self.table_name)
            .finish_non_exhaustive()
    }
}

/// Caller-owned cancellation signal, observed between files and stages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self, stage: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Unexpected(format!("batch cancelled before {stage}")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Ok,
    Failed,
}

/// Terminal artifact of one ingestion batch.
///
/// `fileInformation` is the full table set after the batch's operations were
/// applied, so it can be handed back as the prior state of the next batch. A
/// failed batch applies nothing and carries the prior state unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileProcessingResult {
    pub status: ProcessingStatus,
    pub file_information: Vec<FileStats>,
    pub file_processing_errors: Vec<FileProcessingError>,
    pub join_information: Vec<JoinTableDefinition>,
    pub join_kind: JoinKind,
    pub view_name: Option<String>,
    pub view_statement: Option<String>,
    pub table_statements: Vec<String>,
}

impl FileProcessingResult {
    pub fn is_ok(&self) -> bool {
        self.status == ProcessingStatus::Ok
    }

    pub fn errors_of(&self, kind: ErrorKind) -> impl Iterator<Item = &FileProcessingError> {
        self.file_processing_errors
            .iter()
            .filter(move |e| e.error_type == kind)
    }
}

/// The analytical engine that receives table and view statements.
pub trait QueryEngine {
    fn execute(&self, statement: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Ingestor {
    workspace_id: String,
    model_id: String,
    delimiter: Option<u8>,
    encoding: &'static Encoding,
    join_kind: JoinKind,
    join_options: JoinOptions,
    bucket: String,
    cancel: CancelFlag,
}

impl Ingestor {
    pub fn new(workspace_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            model_id: model_id.into(),
            delimiter: None,
            encoding: UTF_8,
            join_kind: JoinKind::default(),
            join_options: JoinOptions::default(),
            bucket: DEFAULT_BUCKET.to_string(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn from_config(
        workspace_id: impl Into<String>,
        model_id: impl Into<String>,
        config: &IngestConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self::new(workspace_id, model_id)
            .delimiter(config.delimiter_byte()?)
            .encoding(config.encoding()?)
            .join_kind(config.join_kind)
            .join_options(config.join_options())
            .bucket(config.bucket.clone()))
    }

    pub fn delimiter(mut self, delimiter: Option<u8>) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn join_kind(mut self, join_kind: JoinKind) -> Self {
        self.join_kind = join_kind;
        self
    }

    pub fn join_options(mut self, join_options: JoinOptions) -> Self {
        self.join_options = join_options;
        self
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn ingest(&self, files: Vec<RawFile>, prior: &[FileStats]) -> FileProcessingResult {
        let batch_label = files
            .iter()
            .map(|f| f.file_name.as_str())
            .sorted()
            .join(", ");
        info!(
            "Ingesting {} file(s) into '{}/{}' over {} existing table(s)",
            files.len(),
            self.workspace_id,
            self.model_id,
            prior.len()
        );

        let mut batch = Batch {
            label: batch_label,
            tables: prior
                .iter()
                .map(|stats| (stats.table_name.clone(), stats.clone()))
                .collect(),
            errors: Vec::new(),
            rebuilt: BTreeSet::new(),
            deleted: BTreeSet::new(),
        };

        match self.run(files, &mut batch) {
            Ok(planned) => {
                info!(
                    "Planned view '{}' over {} table(s) with {} recorded error(s)",
                    planned.view.name,
                    planned.join_information.len(),
                    batch.errors.len()
                );
                FileProcessingResult {
                    status: ProcessingStatus::Ok,
                    file_information: planned.sorted,
                    file_processing_errors: batch.errors,
                    join_information: planned.join_information,
                    join_kind: self.join_kind,
                    view_name: Some(planned.view.name),
                    view_statement: Some(planned.view.statement),
                    table_statements: planned.table_statements,
                }
            }
            Err((file_name, error)) => {
                warn!("Batch '{}' failed: {error}", batch.label);
                let mut errors = batch.errors;
                errors.push(FileProcessingError::from_error(file_name, &error));
                FileProcessingResult {
                    status: ProcessingStatus::Failed,
                    file_information: prior.to_vec(),
                    file_processing_errors: errors,
                    join_information: Vec::new(),
                    join_kind: self.join_kind,
                    view_name: None,
                    view_statement: None,
                    table_statements: Vec::new(),
                }
            }
        }
    }

    fn run(
        &self,
        files: Vec<RawFile>,
        batch: &mut Batch,
    ) -> std::result::Result<Planned, (String, Error)> {
        let batch_error = |label: &str, error: Error| (label.to_string(), error);
        self.cancel
            .check("reading files")
            .map_err(|e| batch_error(&batch.label, e))?;

        let mut loaded: Vec<(String, String, FileOperation, Result<Loaded>)> = files
            .into_par_iter()
            .map(|file| {
                let table_name = file.target_table();
                let RawFile {
                    file_name,
                    operation,
                    reader,
                    ..
                } = file;
                let outcome = self.load(&file_name, &table_name, operation, reader);
                (file_name, table_name, operation, outcome)
            })
            .collect();
        loaded.sort_by(|left, right| {
            (&left.1, &left.0, left.2).cmp(&(&right.1, &right.0, right.2))
        });

        for (file_name, table_name, operation, outcome) in loaded {
            let loaded = outcome.map_err(|error| (file_name.clone(), error))?;
            if let Err(error) = batch.apply(&file_name, &table_name, operation, loaded) {
                debug!("Skipping '{file_name}' ({operation:?}): {error}");
                batch.errors.push(
                    FileProcessingError::from_error(&file_name, &error).with_table(&table_name),
                );
            }
        }

        if batch.tables.is_empty() {
            return Err(batch_error(
                &batch.label,
                Error::InvalidTableSet("no table remains after applying the batch".to_string()),
            ));
        }
        let surviving: Vec<FileStats> = batch.tables.values().cloned().collect();

        self.cancel
            .check("join planning")
            .map_err(|e| batch_error(&batch.label, e))?;
        let sorted = TableSorter::new().sort_tables(&surviving);
        let plan = JoinTablePlanner::new(&self.workspace_id, &self.model_id)
            .with_options(self.join_options)
            .plan(&sorted)
            .map_err(|e| batch_error(&batch.label, e))?;
        batch.errors.extend(plan.errors);

        self.cancel
            .check("view planning")
            .map_err(|e| batch_error(&batch.label, e))?;
        let view_name = paths::view_name(&self.workspace_id, &self.model_id);
        let mut planner = ViewQueryPlanner::new(self.join_kind);
        let view = planner
            .define_view(&view_name, &plan.tables)
            .map_err(|e| batch_error(&batch.label, e))?
            .clone();

        let table_statements = self
            .table_statements(batch, &plan.tables)
            .map_err(|e| batch_error(&batch.label, e))?;

        Ok(Planned {
            sorted,
            join_information: plan.tables,
            view,
            table_statements,
        })
    }

    /// Drops tables this batch deleted, then creates every planned table.
    /// Tables rebuilt by REPLACE or APPEND are dropped first so the engine
    /// picks up their new columns.
    fn table_statements(&self, batch: &Batch, tables: &[JoinTableDefinition]) -> Result<Vec<String>> {
        let planned: BTreeSet<&str> = tables.iter().map(|t| t.table_name.as_str()).collect();
        let mut statements: Vec<String> = batch
            .deleted
            .iter()
            .filter(|name| !planned.contains(name.as_str()))
            .map(|name| {
                table_ddl::drop_table_statement(&paths::table_name(
                    &self.workspace_id,
                    &self.model_id,
                    name,
                ))
            })
            .collect();
        for table in tables {
            if batch.rebuilt.contains(&table.table_name) || batch.deleted.contains(&table.table_name) {
                statements.push(table_ddl::drop_table_statement(&table.backing_table_name));
            }
            statements.push(table_ddl::create_table_statement(
                &self.bucket,
                &self.workspace_id,
                &self.model_id,
                table,
            )?);
        }
        Ok(statements)
    }

    fn load(
        &self,
        file_name: &str,
        table_name: &str,
        operation: FileOperation,
        reader: Box<dyn Read + Send>,
    ) -> Result<Loaded> {
        self.cancel.check(&format!("reading '{file_name}'"))?;
        if operation == FileOperation::Delete {
            return Ok(Loaded::Delete);
        }
        let report = FileStatsBuilder::new(file_name)
            .table_name(table_name)
            .delimiter(self.delimiter)
            .encoding(self.encoding)
            .build(reader)?;
        Ok(Loaded::Read {
            stats: report.stats,
            errors: report.errors,
        })
    }
}

enum Loaded {
    Read {
        stats: FileStats,
        errors: Vec<FileProcessingError>,
    },
    Delete,
}

struct Planned {
    sorted: Vec<FileStats>,
    join_information: Vec<JoinTableDefinition>,
    view: ViewDefinition,
    table_statements: Vec<String>,
}

struct Batch {
    label: String,
    tables: BTreeMap<String, FileStats>,
    errors: Vec<FileProcessingError>,
    rebuilt: BTreeSet<String>,
    deleted: BTreeSet<String>,
}

impl Batch {
    fn apply(
        &mut self,
        file_name: &str,
        table_name: &str,
        operation: FileOperation,
        loaded: Loaded,
    ) -> Result<()> {
        let stats = match loaded {
            Loaded::Read { stats, errors } => {
                self.errors.extend(errors);
                Some(stats)
            }
            Loaded::Delete => None,
        };
        let existing = self.tables.get(table_name);
        match (operation, stats) {
            (FileOperation::Delete, _) => {
                if self.tables.remove(table_name).is_none() {
                    return Err(Error::TableDoesNotExist(table_name.to_string()));
                }
                self.deleted.insert(table_name.to_string());
                debug!("Deleted table '{table_name}'");
            }
            (_, None) => {
                return Err(Error::Unexpected(format!(
                    "'{file_name}' was not read"
                )));
            }
            (FileOperation::Add, Some(stats)) => {
                if existing.is_some() {
                    return Err(Error::TableAlreadyExists(table_name.to_string()));
                }
                self.tables.insert(table_name.to_string(), stats);
            }
            (FileOperation::Replace, Some(stats)) => {
                if existing.is_none() {
                    return Err(Error::TableDoesNotExist(table_name.to_string()));
                }
                self.tables.insert(table_name.to_string(), stats);
                self.rebuilt.insert(table_name.to_string());
            }
            (FileOperation::Append, Some(stats)) => {
                let Some(existing) = existing else {
                    return Err(Error::TableDoesNotExist(table_name.to_string()));
                };
                let merged = append_stats(existing, stats)?;
                self.tables.insert(table_name.to_string(), merged);
                self.rebuilt.insert(table_name.to_string());
            }
        }
        Ok(())
    }
}

/// Folds an appended file into the stats of the table it extends.
pub fn append_stats(existing: &FileStats, incoming: FileStats) -> Result<FileStats> {
    if existing.file_name == incoming.file_name {
        return Err(Error::FileAlreadyExists(incoming.file_name));
    }
    if existing.columns.len() != incoming.columns.len() {
        return Err(Error::invalid_field(
            &existing.table_name,
            format!(
                "'{}' has {} column(s) but table '{}' has {}",
                incoming.file_name,
                incoming.columns.len(),
                existing.table_name,
                existing.columns.len()
            ),
        ));
    }
    let columns = existing
        .columns
        .iter()
        .zip(&incoming.columns)
        .map(|(current, added)| merge_column(current, added))
        .collect::<Result<Vec<_>>>()?;
    Ok(FileStats {
        file_name: existing.file_name.clone(),
        table_name: existing.table_name.clone(),
        number_of_rows: existing.number_of_rows + incoming.number_of_rows,
        number_of_columns: existing.number_of_columns,
        columns,
        file_size: existing.file_size + incoming.file_size,
    })
}

fn merge_column(current: &ColumnDefinition, added: &ColumnDefinition) -> Result<ColumnDefinition> {
    if current.name != added.name {
        return Err(Error::invalid_field(
            &added.name,
            format!("expected column '{}' at this position", current.name),
        ));
    }
    let field_type = match (current.field_type, added.field_type) {
        (left, right) if left == right => left,
        (FieldType::Unknown, other) | (other, FieldType::Unknown) => other,
        (left, right) => {
            return Err(Error::invalid_field(
                &added.name,
                format!("appended values are {right} but the table column is {left}"),
            ));
        }
    };
    let longest_string = match (current.longest_string, added.longest_string) {
        (Some(left), Some(right)) => Some(left.max(right)),
        (left, right) => left.or(right),
    };
    Ok(ColumnDefinition {
        name: current.name.clone(),
        original_name: current.original_name.clone(),
        field_type,
        longest_string: (field_type == FieldType::String).then_some(longest_string.unwrap_or(0)),
    })
}

/// Re-plans the view of a successful batch from its join information.
///
/// Returns the same name and statement every time for the same result.
pub fn plan_view(result: &FileProcessingResult) -> Result<ViewDefinition> {
    if !result.is_ok() {
        return Err(Error::InvalidOperation("a failed batch has no view"));
    }
    let view_name = result
        .view_name
        .as_deref()
        .ok_or(Error::InvalidOperation("the batch result carries no view name"))?;
    let mut planner = ViewQueryPlanner::new(result.join_kind);
    planner
        .define_view(view_name, &result.join_information)
        .cloned()
}

/// Sends the table statements, then the view statement, to the engine.
///
/// Returns the published view name. Tables are dropped only when the batch
/// rebuilt or deleted them, and dropping an external table keeps its data, so
/// publishing the same result twice is harmless.
pub fn publish(result: &FileProcessingResult, engine: &dyn QueryEngine) -> Result<String> {
    let view = plan_view(result)?;
    for statement in &result.table_statements {
        engine.execute(statement)?;
    }
    engine.execute(&view.statement)?;
    info!(
        "Published view '{}' with {} table(s)",
        view.name,
        result.table_statements.len()
    );
    Ok(view.name)
}
