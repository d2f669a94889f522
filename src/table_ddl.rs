use itertools::Itertools;

use crate::{
    error::Result,
    field_type::FieldType,
    join::{JoinTableColumnDefinition, JoinTableDefinition},
    paths,
    view::quote_identifier,
};

pub fn storage_type(column: &JoinTableColumnDefinition) -> String {
    match column.column_type {
        FieldType::String => format!("varchar({})", column.column_length.unwrap_or(1).max(1)),
        FieldType::Number => "double".to_string(),
        FieldType::Date => "timestamp".to_string(),
        FieldType::Unknown => "string".to_string(),
    }
}

/// Statement registering one table's columnar data with the analytical engine.
pub fn create_table_statement(
    bucket: &str,
    workspace_id: &str,
    model_id: &str,
    table: &JoinTableDefinition,
) -> Result<String> {
    let location = paths::table_data_prefix(workspace_id, model_id, &table.table_name)?;
    let mut columns: Vec<&JoinTableColumnDefinition> = table.columns.iter().collect();
    columns.sort_by_key(|c| c.column_index);
    let column_list = columns
        .iter()
        .map(|c| format!("  {} {}", quote_identifier(&c.column_name), storage_type(c)))
        .join(",\n");
    Ok(format!(
        "CREATE EXTERNAL TABLE IF NOT EXISTS {} (\n{}\n)\nSTORED AS PARQUET\nLOCATION 's3://{}/{}'",
        quote_identifier(&table.backing_table_name),
        column_list,
        bucket.trim_end_matches('/'),
        location
    ))
}

pub fn drop_table_statement(backing_table_name: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_identifier(backing_table_name))
}
