#![allow(dead_code)]

use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use csv_glyph::ingest::{FileProcessingResult, Ingestor, RawFile};
use tempfile::{TempDir, tempdir};

pub const ORDERS_CSV: &str = "order_id,customer_id,total\n1,10,5.5\n2,11,7\n3,10,12.25\n";
pub const CUSTOMERS_CSV: &str = "customer_id,name\n10,Ann\n11,Bartholomew\n";
pub const WAREHOUSES_CSV: &str = "warehouse_code,city\nW1,Oslo\nW2,Lima\n";

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// In-memory upload with the given name and contents.
pub fn raw(name: &str, contents: &str) -> RawFile {
    RawFile::new(name, Cursor::new(contents.as_bytes().to_vec()))
}

/// Orders and customers ingested into `ws/model` with default settings.
pub fn orders_and_customers() -> FileProcessingResult {
    Ingestor::new("ws", "model").ingest(
        vec![raw("orders.csv", ORDERS_CSV), raw("customers.csv", CUSTOMERS_CSV)],
        &[],
    )
}
