pub mod cli;
pub mod column_name;
pub mod config;
pub mod error;
pub mod field_type;
pub mod file_stats;
pub mod ingest;
pub mod io_utils;
pub mod join;
pub mod paths;
pub mod query;
pub mod table_ddl;
pub mod table_sorter;
pub mod view;

use std::{
    env,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
    sync::{Mutex, OnceLock},
};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{TimeZone, Utc};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};

use crate::{
    cli::{Cli, Commands},
    config::IngestConfig,
    ingest::{FileProcessingResult, Ingestor, QueryEngine, RawFile},
    query::{AxisBindings, QueryCompiler},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_glyph", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest(args) => handle_ingest(&args),
        Commands::Compile(args) => handle_compile(&args),
        Commands::Paths(args) => handle_paths(&args),
    }
}

fn load_config(path: Option<&Path>) -> Result<IngestConfig> {
    match path {
        Some(path) => {
            IngestConfig::load(path).with_context(|| format!("Loading config from {path:?}"))
        }
        None => Ok(IngestConfig::default()),
    }
}

fn load_result(path: &Path) -> Result<FileProcessingResult> {
    let file = File::open(path).with_context(|| format!("Opening result file {path:?}"))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Parsing result JSON {path:?}"))
}

fn handle_ingest(args: &cli::IngestArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(encoding) = &args.input_encoding {
        config.encoding = encoding.clone();
    }
    if let Some(join_kind) = args.join_kind {
        config.join_kind = join_kind;
    }
    let mut ingestor = Ingestor::from_config(&args.workspace, &args.model, &config)?;
    if args.delimiter.is_some() {
        ingestor = ingestor.delimiter(args.delimiter);
    }
    info!(
        "Ingesting {} file(s) into '{}/{}' with operation {:?}",
        args.inputs.len(),
        args.workspace,
        args.model,
        args.operation
    );

    let prior = match &args.prior {
        Some(path) => load_result(path)?.file_information,
        None => Vec::new(),
    };
    debug!("Prior state holds {} table(s)", prior.len());

    let files = args
        .inputs
        .iter()
        .map(|path| {
            let mut file = RawFile::open(path)
                .with_context(|| format!("Opening input file {path:?}"))?
                .with_operation(args.operation);
            if let Some(table) = &args.table {
                file = file.with_table(table);
            }
            Ok(file)
        })
        .collect::<Result<Vec<_>>>()?;

    let result = ingestor.ingest(files, &prior);
    for error in &result.file_processing_errors {
        warn!("{error}");
    }

    let json = serde_json::to_string_pretty(&result).context("Serializing result JSON")?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Writing result to {path:?}"))?;
            info!("Result written to {path:?}");
        }
        None => println!("{json}"),
    }

    if !result.is_ok() {
        let reason = result
            .file_processing_errors
            .iter()
            .rev()
            .find(|e| e.is_batch_fatal())
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "unknown failure".to_string());
        bail!("Batch failed: {reason}");
    }

    if let Some(path) = &args.sql {
        let script = SqlScript::create(path)?;
        let view = ingest::publish(&result, &script)
            .with_context(|| format!("Writing statements to {path:?}"))?;
        script.finish()?;
        info!("Statements for view '{view}' written to {path:?}");
    }
    Ok(())
}

fn handle_compile(args: &cli::CompileArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let file = File::open(&args.axes).with_context(|| format!("Opening axes file {:?}", args.axes))?;
    let bindings: AxisBindings = serde_yaml::from_reader(BufReader::new(file))
        .with_context(|| format!("Parsing axes YAML {:?}", args.axes))?;
    let result = load_result(&args.result)?;
    let view = ingest::plan_view(&result).context("Planning view from result")?;
    debug!("View '{}' exposes {} column(s)", view.name, view.columns.len());

    let compiled = QueryCompiler::new(config.default_aggregate)
        .compile(&bindings, &view)
        .context("Compiling axis bindings")?;
    println!("-- glyph query\n{};\n", compiled.query_text);
    println!("-- bounds query\n{};", compiled.bounds_query_text);
    Ok(())
}

fn handle_paths(args: &cli::PathsArgs) -> Result<()> {
    let csv_key = paths::table_csv_path(&args.workspace, &args.model, &args.table, &args.file)?;
    let parquet_key =
        paths::table_parquet_path(&args.workspace, &args.model, &args.table, &args.file)?;
    println!("table: {}", paths::table_name(&args.workspace, &args.model, &args.table));
    println!("view: {}", paths::view_name(&args.workspace, &args.model));
    println!("csv: {csv_key}");
    println!("parquet: {parquet_key}");
    if let Some(millis) = args.timestamp_ms {
        let at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| anyhow!("{millis} is not a valid millisecond timestamp"))?;
        println!("archive csv: {}", paths::archive_file_path(&csv_key, at)?);
        println!("archive parquet: {}", paths::archive_file_path(&parquet_key, at)?);
    }
    Ok(())
}

/// Query engine stand-in that appends each statement to a SQL script.
struct SqlScript {
    writer: Mutex<BufWriter<File>>,
}

impl SqlScript {
    fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("Creating SQL script {path:?}"))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn finish(self) -> Result<()> {
        let mut writer = self
            .writer
            .into_inner()
            .map_err(|_| anyhow!("SQL script writer poisoned"))?;
        writer.flush().context("Flushing SQL script")
    }
}

impl QueryEngine for SqlScript {
    fn execute(&self, statement: &str) -> error::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| error::Error::Unexpected("SQL script writer poisoned".to_string()))?;
        writeln!(writer, "{statement};\n")?;
        Ok(())
    }
}
