use std::{
    fs::File,
    io::BufReader,
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::{cli::parse_delimiter, io_utils, join::JoinOptions, query::Aggregate, view::JoinKind};

pub const DEFAULT_BUCKET: &str = "glyph-data";

/// Settings for one ingestion run, usually read from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IngestConfig {
    /// Field delimiter: a single ASCII character or one of `tab`, `comma`, `pipe`, `semicolon`.
    pub delimiter: Option<String>,
    pub encoding: String,
    pub join_kind: JoinKind,
    pub select_join_columns: bool,
    pub bucket: String,
    pub default_aggregate: Aggregate,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            delimiter: None,
            encoding: "utf-8".to_string(),
            join_kind: JoinKind::default(),
            select_join_columns: false,
            bucket: DEFAULT_BUCKET.to_string(),
            default_aggregate: Aggregate::default(),
        }
    }
}

impl IngestConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let config: IngestConfig = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing config YAML {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating config file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing config YAML")
    }

    /// Rejects settings that would only fail later, mid-batch.
    pub fn validate(&self) -> Result<()> {
        self.delimiter_byte()?;
        self.encoding()?;
        if self.bucket.trim().is_empty() {
            return Err(anyhow!("bucket must not be empty"));
        }
        Ok(())
    }

    /// `None` lets the file extension pick the delimiter.
    pub fn delimiter_byte(&self) -> Result<Option<u8>> {
        self.delimiter
            .as_deref()
            .map(|value| parse_delimiter(value).map_err(|err| anyhow!(err)))
            .transpose()
            .with_context(|| format!("Invalid delimiter {:?}", self.delimiter))
    }

    pub fn encoding(&self) -> Result<&'static Encoding> {
        io_utils::resolve_encoding(Some(&self.encoding))
            .with_context(|| format!("Resolving encoding '{}'", self.encoding))
    }

    pub fn join_options(&self) -> JoinOptions {
        JoinOptions {
            select_join_columns: self.select_join_columns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{UTF_8, WINDOWS_1252};
    use tempfile::tempdir;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config: IngestConfig = serde_yaml::from_str("join_kind: full\n").unwrap();
        assert_eq!(config.join_kind, JoinKind::Full);
        assert_eq!(config.bucket, DEFAULT_BUCKET);
        assert_eq!(config.default_aggregate, Aggregate::Sum);
        assert_eq!(config.encoding().unwrap(), UTF_8);
        assert_eq!(config.delimiter_byte().unwrap(), None);
    }

    #[test]
    fn load_resolves_named_delimiter_and_encoding() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("ingest.yml");
        std::fs::write(
            &path,
            "delimiter: pipe\nencoding: windows-1252\nselect_join_columns: true\ndefault_aggregate: avg\n",
        )
        .unwrap();
        let config = IngestConfig::load(&path).expect("load config");
        assert_eq!(config.delimiter_byte().unwrap(), Some(b'|'));
        assert_eq!(config.encoding().unwrap(), WINDOWS_1252);
        assert!(config.join_options().select_join_columns);
        assert_eq!(config.default_aggregate, Aggregate::Avg);
    }

    #[test]
    fn load_rejects_unknown_encoding() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("bad.yml");
        std::fs::write(&path, "encoding: klingon\n").unwrap();
        let err = IngestConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("klingon"));
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("saved.yml");
        let config = IngestConfig {
            delimiter: Some(";".to_string()),
            join_kind: JoinKind::Inner,
            bucket: "other-bucket".to_string(),
            ..IngestConfig::default()
        };
        config.save(&path).expect("save");
        assert_eq!(IngestConfig::load(&path).expect("load"), config);
    }
}
