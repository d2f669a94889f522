//! Reader construction and decoding for uploaded CSV streams.
//!
//! Every file read in csv-glyph flows through this module:
//!
//! - **Encoding**: label resolution via `encoding_rs`, defaulting to UTF-8.
//! - **Reader construction**: `open_csv_reader` over any byte stream, with
//!   flexible record lengths so ragged rows surface as recorded errors rather
//!   than hard CSV failures.
//! - **Metering**: [`MeteredReader`] counts bytes as the CSV parser pulls them,
//!   so file size is known without a second pass over the source.

use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use encoding_rs::{Encoding, UTF_8};

use crate::error::{Error, Result};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    match label {
        Some(value) => Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| Error::Unexpected(format!("Unknown encoding '{value}'"))),
        None => Ok(UTF_8),
    }
}

pub fn resolve_input_delimiter(file_name: &str, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match Path::new(file_name).extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_file(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path)?;
    Ok(BufReader::new(file))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Option<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        None
    } else {
        Some(text.into_owned())
    }
}

/// Decodes a header record; headers must decode cleanly.
pub fn decode_headers(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            decode_bytes(field, encoding).ok_or_else(|| {
                Error::Unexpected(format!(
                    "Header {} is not valid {} text",
                    idx + 1,
                    encoding.name()
                ))
            })
        })
        .collect()
}

/// Shared byte counter handed out by [`MeteredReader::counter`].
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct MeteredReader<R> {
    inner: R,
    counter: ByteCounter,
}

impl<R: Read> MeteredReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            counter: ByteCounter::default(),
        }
    }

    pub fn counter(&self) -> ByteCounter {
        self.counter.clone()
    }
}

impl<R: Read> Read for MeteredReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.counter.0.fetch_add(read as u64, Ordering::Relaxed);
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::WINDOWS_1252;
    use std::io::Cursor;

    #[test]
    fn metered_reader_counts_every_byte() {
        let data = b"id,name\n1,alpha\n2,beta\n".to_vec();
        let expected = data.len() as u64;
        let metered = MeteredReader::new(Cursor::new(data));
        let counter = metered.counter();
        let mut reader = open_csv_reader(metered, b',');
        let rows = reader.byte_records().count();
        assert_eq!(rows, 2);
        assert_eq!(counter.get(), expected);
    }

    #[test]
    fn delimiter_follows_extension_unless_provided() {
        assert_eq!(resolve_input_delimiter("data.TSV", None), b'\t');
        assert_eq!(resolve_input_delimiter("data.csv", None), b',');
        assert_eq!(resolve_input_delimiter("data.tsv", Some(b';')), b';');
    }

    #[test]
    fn resolves_known_encodings() {
        assert_eq!(resolve_encoding(None).unwrap(), UTF_8);
        assert_eq!(resolve_encoding(Some(" windows-1252 ")).unwrap(), WINDOWS_1252);
        assert!(resolve_encoding(Some("klingon")).is_err());
    }

    #[test]
    fn decode_bytes_rejects_invalid_utf8() {
        assert_eq!(decode_bytes(b"caf\xc3\xa9", UTF_8).as_deref(), Some("café"));
        assert_eq!(decode_bytes(b"caf\xe9", UTF_8), None);
    }
}
