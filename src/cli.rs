use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{ingest::FileOperation, view::JoinKind};

#[derive(Debug, Parser)]
#[command(author, version, about = "Infer, join and query uploaded CSV tables", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Ingest CSV files into a workspace model and plan its view
    Ingest(IngestArgs),
    /// Compile X/Y/Z axis bindings into the glyph query and its bounds query
    Compile(CompileArgs),
    /// Print the table, view and object-store names derived for one file
    Paths(PathsArgs),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Input CSV files, one table per file
    #[arg(short = 'i', long = "input", required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,
    /// Workspace identifier
    #[arg(long)]
    pub workspace: String,
    /// Model identifier
    #[arg(long)]
    pub model: String,
    /// YAML ingest configuration
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Operation applied to every input file
    #[arg(long, value_enum, default_value_t = FileOperation::Add)]
    pub operation: FileOperation,
    /// Target table name (defaults to each file's normalized stem)
    #[arg(long)]
    pub table: Option<String>,
    /// Result JSON of a previous batch whose tables form the prior state
    #[arg(long)]
    pub prior: Option<PathBuf>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Join kind used by the view
    #[arg(long = "join-kind", value_enum)]
    pub join_kind: Option<JoinKind>,
    /// Write the File Processing Result JSON here (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Write the table and view statements as a SQL script
    #[arg(long)]
    pub sql: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct CompileArgs {
    /// YAML axis bindings (x, y, z and an optional aggregate)
    #[arg(long)]
    pub axes: PathBuf,
    /// File Processing Result JSON written by `ingest`
    #[arg(long)]
    pub result: PathBuf,
    /// YAML ingest configuration supplying the default aggregate
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct PathsArgs {
    #[arg(long)]
    pub workspace: String,
    #[arg(long)]
    pub model: String,
    #[arg(long)]
    pub table: String,
    #[arg(long)]
    pub file: String,
    /// Also print archive keys for this instant (milliseconds since the epoch)
    #[arg(long = "timestamp-ms")]
    pub timestamp_ms: Option<i64>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() || first == '"' || first == '\n' || first == '\r' {
                return Err("Delimiter must be an ASCII character other than a quote or newline".to_string());
            }
            Ok(first as u8)
        }
    }
}
