//! Join planning across the tables of one ingestion batch.
//!
//! A normalized column name that appears in two or more tables with the same
//! field type is a join key. The first table in sort order that carries the
//! name owns the key; every occurrence is flagged as a join column. The key's
//! type is the first known type in sort order, and UNKNOWN columns (from
//! header-only files) match it. Shared names whose types disagree with the
//! key's are not keys: those columns are dropped from the selection and
//! reported.
//!
//! The batch is only valid when the key edges connect every table into a
//! single component, which is checked with a disjoint-set over table indices.

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, ErrorKind, FileProcessingError, Result},
    field_type::FieldType,
    file_stats::FileStats,
    paths,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinTableColumnDefinition {
    pub column_index: usize,
    pub column_name: String,
    pub column_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_length: Option<usize>,
    pub is_join_column: bool,
    pub is_selected_column: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinTableDefinition {
    pub table_name: String,
    pub backing_table_name: String,
    pub file_name: String,
    pub columns: Vec<JoinTableColumnDefinition>,
}

impl JoinTableDefinition {
    pub fn join_columns(&self) -> impl Iterator<Item = &JoinTableColumnDefinition> {
        self.columns.iter().filter(|c| c.is_join_column)
    }

    pub fn selected_columns(&self) -> impl Iterator<Item = &JoinTableColumnDefinition> {
        self.columns.iter().filter(|c| c.is_selected_column)
    }

    pub fn has_join_column(&self, name: &str) -> bool {
        self.join_columns().any(|c| c.column_name == name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinOptions {
    /// Keep join columns in each table's selection instead of projecting them once.
    pub select_join_columns: bool,
}

#[derive(Debug, Clone)]
pub struct JoinPlan {
    pub tables: Vec<JoinTableDefinition>,
    pub errors: Vec<FileProcessingError>,
}

#[derive(Debug, Clone)]
pub struct JoinTablePlanner {
    workspace_id: String,
    model_id: String,
    options: JoinOptions,
}

impl JoinTablePlanner {
    pub fn new(workspace_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            model_id: model_id.into(),
            options: JoinOptions::default(),
        }
    }

    pub fn with_options(mut self, options: JoinOptions) -> Self {
        self.options = options;
        self
    }

    /// Plans the join for tables already ordered by the table sorter.
    pub fn plan(&self, sorted: &[FileStats]) -> Result<JoinPlan> {
        if sorted.is_empty() {
            return Err(Error::InvalidTableSet(
                "the batch does not contain any table".to_string(),
            ));
        }

        let mut occurrences: BTreeMap<&str, Vec<(usize, usize)>> = BTreeMap::new();
        for (table_idx, table) in sorted.iter().enumerate() {
            for (col_idx, column) in table.columns.iter().enumerate() {
                occurrences
                    .entry(column.name.as_str())
                    .or_default()
                    .push((table_idx, col_idx));
            }
        }

        let mut is_join = mark_matrix(sorted);
        let mut excluded = mark_matrix(sorted);
        let mut components = DisjointSet::new(sorted.len());
        let mut errors = Vec::new();

        for (name, places) in &occurrences {
            if places.len() < 2 {
                continue;
            }
            let owner_table = places[0].0;
            let (key_table, key_type) = places
                .iter()
                .map(|&(t, c)| (t, sorted[t].columns[c].field_type))
                .find(|(_, field_type)| *field_type != FieldType::Unknown)
                .unwrap_or((owner_table, FieldType::Unknown));
            let (group, conflicts): (Vec<(usize, usize)>, Vec<(usize, usize)>) =
                places.iter().partition(|&&(t, c)| {
                    let field_type = sorted[t].columns[c].field_type;
                    field_type == key_type || field_type == FieldType::Unknown
                });

            if group.len() >= 2 {
                debug!(
                    "Join key '{name}' owned by '{}' shared by {} table(s)",
                    sorted[owner_table].table_name,
                    group.len()
                );
                for &(t, c) in &group {
                    is_join[t][c] = true;
                    components.union(owner_table, t);
                }
            }
            for (t, c) in conflicts {
                excluded[t][c] = true;
                let table = &sorted[t];
                let column = &table.columns[c];
                errors.push(
                    FileProcessingError::new(
                        ErrorKind::InvalidFieldValue,
                        &table.file_name,
                        format!(
                            "Column '{name}' is {} here but {} in table '{}'; excluded from the view",
                            column.field_type,
                            key_type,
                            sorted[key_table].table_name
                        ),
                    )
                    .with_table(&table.table_name)
                    .at_column(c, name.to_string()),
                );
            }
        }

        ensure_connected(sorted, &mut components)?;

        let tables = sorted
            .iter()
            .enumerate()
            .map(|(t, table)| JoinTableDefinition {
                table_name: table.table_name.clone(),
                backing_table_name: paths::table_name(
                    &self.workspace_id,
                    &self.model_id,
                    &table.table_name,
                ),
                file_name: table.file_name.clone(),
                columns: table
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(c, column)| {
                        let join = is_join[t][c];
                        let selected = !excluded[t][c] && (!join || self.options.select_join_columns);
                        JoinTableColumnDefinition {
                            column_index: c,
                            column_name: column.name.clone(),
                            column_type: column.field_type,
                            column_length: column.longest_string,
                            is_join_column: join,
                            is_selected_column: selected,
                        }
                    })
                    .collect(),
            })
            .collect();

        Ok(JoinPlan { tables, errors })
    }
}

fn mark_matrix(tables: &[FileStats]) -> Vec<Vec<bool>> {
    tables.iter().map(|t| vec![false; t.columns.len()]).collect()
}

fn ensure_connected(sorted: &[FileStats], components: &mut DisjointSet) -> Result<()> {
    let root = components.find(0);
    let detached: Vec<&str> = (1..sorted.len())
        .filter(|idx| components.find(*idx) != root)
        .map(|idx| sorted[idx].table_name.as_str())
        .collect();
    if detached.is_empty() {
        return Ok(());
    }
    Err(Error::InvalidTableSet(format!(
        "table(s) {} share no join column with '{}'",
        detached
            .iter()
            .map(|name| format!("'{name}'"))
            .collect::<Vec<_>>()
            .join(", "),
        sorted[0].table_name
    )))
}

#[derive(Debug)]
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    fn find(&mut self, idx: usize) -> usize {
        let mut root = idx;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = idx;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    fn union(&mut self, left: usize, right: usize) {
        let left = self.find(left);
        let right = self.find(right);
        if left == right {
            return;
        }
        match self.rank[left].cmp(&self.rank[right]) {
            std::cmp::Ordering::Less => self.parent[left] = right,
            std::cmp::Ordering::Greater => self.parent[right] = left,
            std::cmp::Ordering::Equal => {
                self.parent[right] = left;
                self.rank[left] += 1;
            }
        }
    }
}
