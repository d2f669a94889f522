use std::collections::{BTreeMap, HashSet};

use clap::ValueEnum;
use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    field_type::FieldType,
    join::JoinTableDefinition,
};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "kebab-case")]
pub enum JoinKind {
    Inner,
    #[default]
    Left,
    Full,
}

impl JoinKind {
    fn keyword(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT OUTER JOIN",
            JoinKind::Full => "FULL OUTER JOIN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ViewColumn {
    pub name: String,
    pub field_type: FieldType,
}

/// A planned view: its statement plus the projected columns and their types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ViewDefinition {
    pub name: String,
    pub statement: String,
    pub columns: Vec<ViewColumn>,
}

impl ViewDefinition {
    pub fn column_type(&self, name: &str) -> Option<FieldType> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.field_type)
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn qualified(table: &str, column: &str) -> String {
    format!("{}.{}", quote_identifier(table), quote_identifier(column))
}

#[derive(Debug, Default)]
pub struct ViewQueryPlanner {
    join_kind: JoinKind,
    planned: Option<ViewDefinition>,
}

impl ViewQueryPlanner {
    pub fn new(join_kind: JoinKind) -> Self {
        Self {
            join_kind,
            planned: None,
        }
    }

    /// The statement from the last successful [`ViewQueryPlanner::define_view`].
    pub fn view(&self) -> Result<&str> {
        self.definition().map(|d| d.statement.as_str())
    }

    pub fn definition(&self) -> Result<&ViewDefinition> {
        self.planned
            .as_ref()
            .ok_or(Error::InvalidOperation("no view has been defined yet"))
    }

    pub fn define_view(
        &mut self,
        view_name: &str,
        tables: &[JoinTableDefinition],
    ) -> Result<&ViewDefinition> {
        let definition = plan_view(self.join_kind, view_name, tables)?;
        debug!(
            "Planned view '{}' over {} table(s) with {} column(s)",
            definition.name,
            tables.len(),
            definition.columns.len()
        );
        Ok(&*self.planned.insert(definition))
    }
}

fn plan_view(
    join_kind: JoinKind,
    view_name: &str,
    tables: &[JoinTableDefinition],
) -> Result<ViewDefinition> {
    if tables.is_empty() {
        return Err(Error::InvalidTableSet(
            "a view needs at least one table".to_string(),
        ));
    }
    let mut aliases = HashSet::new();
    for table in tables {
        if !aliases.insert(table.table_name.as_str()) {
            return Err(Error::InvalidTableSet(format!(
                "table '{}' appears more than once",
                table.table_name
            )));
        }
    }

    let order = join_order(tables)?;

    // key name -> (type, holders in join order)
    let mut keys: Vec<&str> = Vec::new();
    let mut holders: BTreeMap<&str, (FieldType, Vec<&str>)> = BTreeMap::new();
    let mut from_clause = String::new();

    for (position, &idx) in order.iter().enumerate() {
        let table = &tables[idx];
        let alias = table.table_name.as_str();
        let mut conditions = Vec::new();
        for column in table.join_columns() {
            let name = column.column_name.as_str();
            match holders.get_mut(name) {
                Some((_, seen)) => {
                    conditions.push(format!(
                        "{} = {}",
                        qualified(alias, name),
                        qualified(seen[0], name)
                    ));
                    seen.push(alias);
                }
                None => {
                    keys.push(name);
                    holders.insert(name, (column.column_type, vec![alias]));
                }
            }
        }
        let source = format!(
            "{} AS {}",
            quote_identifier(&table.backing_table_name),
            quote_identifier(alias)
        );
        if position == 0 {
            from_clause.push_str(&format!("FROM {source}"));
        } else {
            from_clause.push_str(&format!(
                "\n{} {source} ON {}",
                join_kind.keyword(),
                conditions.join(" AND ")
            ));
        }
    }

    let mut used = HashSet::new();
    let mut projections = Vec::new();
    let mut columns = Vec::new();

    for key in keys {
        let Some((field_type, seen)) = holders.get(key) else {
            continue;
        };
        let expression = if join_kind == JoinKind::Full && seen.len() > 1 {
            format!(
                "COALESCE({})",
                seen.iter()
                    .map(|alias| qualified(alias, key))
                    .join(", ")
            )
        } else {
            qualified(seen[0], key)
        };
        let alias = unique_alias(&mut used, key.to_string());
        projections.push(format!("{expression} AS {}", quote_identifier(&alias)));
        columns.push(ViewColumn {
            name: alias,
            field_type: *field_type,
        });
    }

    for &idx in &order {
        let table = &tables[idx];
        let mut selected: Vec<_> = table.selected_columns().collect();
        selected.sort_by_key(|c| c.column_index);
        for column in selected {
            let preferred = if column.is_join_column {
                format!("{}_{}", table.table_name, column.column_name)
            } else {
                column.column_name.clone()
            };
            let alias = unique_alias(&mut used, preferred);
            projections.push(format!(
                "{} AS {}",
                qualified(&table.table_name, &column.column_name),
                quote_identifier(&alias)
            ));
            columns.push(ViewColumn {
                name: alias,
                field_type: column.column_type,
            });
        }
    }

    if projections.is_empty() {
        return Err(Error::Unexpected(format!(
            "view '{view_name}' would not project any column"
        )));
    }

    let statement = format!(
        "CREATE OR REPLACE VIEW {} AS\nSELECT\n  {}\n{}",
        quote_identifier(view_name),
        projections.join(",\n  "),
        from_clause
    );
    Ok(ViewDefinition {
        name: view_name.to_string(),
        statement,
        columns,
    })
}

/// Join order: the first table, then repeatedly the earliest remaining table
/// that shares a join column with the tables already joined.
fn join_order(tables: &[JoinTableDefinition]) -> Result<Vec<usize>> {
    let mut order = vec![0usize];
    let mut joined_keys: HashSet<&str> = tables[0]
        .join_columns()
        .map(|c| c.column_name.as_str())
        .collect();
    let mut remaining: Vec<usize> = (1..tables.len()).collect();

    while !remaining.is_empty() {
        let next = remaining.iter().position(|&idx| {
            tables[idx]
                .join_columns()
                .any(|c| joined_keys.contains(c.column_name.as_str()))
        });
        let Some(pos) = next else {
            let detached = remaining
                .iter()
                .map(|&idx| format!("'{}'", tables[idx].table_name))
                .join(", ");
            return Err(Error::InvalidTableSet(format!(
                "table(s) {detached} cannot be joined to '{}'",
                tables[0].table_name
            )));
        };
        let idx = remaining.remove(pos);
        joined_keys.extend(tables[idx].join_columns().map(|c| c.column_name.as_str()));
        order.push(idx);
    }
    Ok(order)
}

fn unique_alias(used: &mut HashSet<String>, preferred: String) -> String {
    let mut candidate = preferred.clone();
    let mut counter = 1usize;
    while used.contains(&candidate) {
        candidate = format!("{preferred}_{counter}");
        counter += 1;
    }
    used.insert(candidate.clone());
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ErrorKind, join::JoinTableColumnDefinition};

    fn col(idx: usize, name: &str, ty: FieldType, join: bool) -> JoinTableColumnDefinition {
        JoinTableColumnDefinition {
            column_index: idx,
            column_name: name.to_string(),
            column_type: ty,
            column_length: None,
            is_join_column: join,
            is_selected_column: !join,
        }
    }

    fn table(name: &str, columns: Vec<JoinTableColumnDefinition>) -> JoinTableDefinition {
        JoinTableDefinition {
            table_name: name.to_string(),
            backing_table_name: format!("ws_m_{name}"),
            file_name: format!("{name}.csv"),
            columns,
        }
    }

    #[test]
    fn view_accessor_requires_define_view() {
        let planner = ViewQueryPlanner::default();
        assert!(matches!(planner.view(), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn single_table_view_projects_all_columns() {
        let mut planner = ViewQueryPlanner::new(JoinKind::Left);
        let tables = vec![table(
            "orders",
            vec![col(0, "id", FieldType::Number, false), col(1, "name", FieldType::String, false)],
        )];
        planner.define_view("ws_m_view", &tables).expect("define");
        assert_eq!(
            planner.view().unwrap(),
            "CREATE OR REPLACE VIEW \"ws_m_view\" AS\nSELECT\n  \"orders\".\"id\" AS \"id\",\n  \"orders\".\"name\" AS \"name\"\nFROM \"ws_m_orders\" AS \"orders\""
        );
    }

    #[test]
    fn chained_tables_join_in_connected_order() {
        let tables = vec![
            table("a", vec![col(0, "x", FieldType::Number, true)]),
            table("b", vec![col(0, "y", FieldType::String, true), col(1, "v", FieldType::Number, false)]),
            table("c", vec![col(0, "x", FieldType::Number, true), col(1, "y", FieldType::String, true)]),
        ];
        let mut planner = ViewQueryPlanner::new(JoinKind::Inner);
        let definition = planner.define_view("v", &tables).expect("define").clone();
        let statement = definition.statement;
        let c_join = statement.find("INNER JOIN \"ws_m_c\"").expect("c joined");
        let b_join = statement.find("INNER JOIN \"ws_m_b\"").expect("b joined");
        assert!(c_join < b_join);
        assert!(statement.contains("ON \"b\".\"y\" = \"c\".\"y\""));
        let names: Vec<_> = definition.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y", "v"]);
    }

    #[test]
    fn full_join_coalesces_keys() {
        let tables = vec![
            table("a", vec![col(0, "k", FieldType::Number, true)]),
            table("b", vec![col(0, "k", FieldType::Number, true), col(1, "v", FieldType::Date, false)]),
        ];
        let mut planner = ViewQueryPlanner::new(JoinKind::Full);
        planner.define_view("v", &tables).expect("define");
        let statement = planner.view().unwrap();
        assert!(statement.contains("COALESCE(\"a\".\"k\", \"b\".\"k\") AS \"k\""));
        assert!(statement.contains("FULL OUTER JOIN"));
        assert_eq!(planner.definition().unwrap().column_type("v"), Some(FieldType::Date));
    }

    #[test]
    fn selected_join_columns_get_table_prefixed_aliases() {
        let mut key = col(0, "k", FieldType::Number, true);
        key.is_selected_column = true;
        let tables = vec![
            table("a", vec![key.clone()]),
            table("b", vec![key]),
        ];
        let mut planner = ViewQueryPlanner::new(JoinKind::Left);
        let definition = planner.define_view("v", &tables).expect("define");
        let names: Vec<_> = definition.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["k", "a_k", "b_k"]);
    }

    #[test]
    fn disconnected_definitions_are_rejected() {
        let tables = vec![
            table("a", vec![col(0, "x", FieldType::Number, false)]),
            table("b", vec![col(0, "y", FieldType::Number, false)]),
        ];
        let mut planner = ViewQueryPlanner::new(JoinKind::Left);
        let err = planner.define_view("v", &tables).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTableSet);
        assert!(planner.view().is_err());
    }
}
