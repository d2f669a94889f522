use std::cmp::Ordering;

use crate::{
    error::{Error, Result},
    field_type::{ColumnDefinition, FieldType},
    file_stats::FileStats,
};

/// Orders the tables of one batch so that planning is reproducible.
///
/// The order is table name, then file name, then the remaining stats fields
/// (counts, size, then each column's name, type, longest string and original
/// header), so entries compare equal only when their stats are equal. The
/// input is never mutated.
#[derive(Debug, Default)]
pub struct TableSorter {
    sorted: Option<Vec<FileStats>>,
}

impl TableSorter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort_tables(&mut self, tables: &[FileStats]) -> Vec<FileStats> {
        let mut sorted = tables.to_vec();
        sorted.sort_by(compare_tables);
        self.sorted = Some(sorted.clone());
        sorted
    }

    /// The ordering produced by the last call to [`TableSorter::sort_tables`].
    pub fn sorted_tables(&self) -> Result<&[FileStats]> {
        self.sorted
            .as_deref()
            .ok_or(Error::InvalidOperation("tables have not been sorted yet"))
    }
}

pub fn compare_tables(left: &FileStats, right: &FileStats) -> Ordering {
    left.table_name
        .cmp(&right.table_name)
        .then_with(|| left.file_name.cmp(&right.file_name))
        .then_with(|| left.number_of_columns.cmp(&right.number_of_columns))
        .then_with(|| left.number_of_rows.cmp(&right.number_of_rows))
        .then_with(|| left.file_size.cmp(&right.file_size))
        .then_with(|| {
            left.columns
                .iter()
                .map(column_key)
                .cmp(right.columns.iter().map(column_key))
        })
}

fn column_key(column: &ColumnDefinition) -> (&str, FieldType, Option<usize>, &str) {
    (
        &column.name,
        column.field_type,
        column.longest_string,
        &column.original_name,
    )
}
