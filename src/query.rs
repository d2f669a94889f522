//! Compiles per-axis bindings into the aggregate query that drives glyph
//! generation, plus the bounds query used to normalize glyph coordinates.
//!
//! X and Y are grouping axes; Z is aggregated per (X, Y) cell. Each axis may
//! carry one filter: `NoOp` adds nothing, `Include` adds `column OP value`,
//! and `Exclude` adds the negated comparison. Filter values must match the
//! column's field type as recorded in the view definition.

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    field_type::{DateChecker, FieldChecker, FieldType, FieldValue},
    view::{ViewDefinition, quote_identifier},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::NotEqual => "<>",
            Operator::GreaterThan => ">",
            Operator::GreaterThanEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessThanEqual => "<=",
        }
    }

    pub fn negate(&self) -> Self {
        match self {
            Operator::Equal => Operator::NotEqual,
            Operator::NotEqual => Operator::Equal,
            Operator::GreaterThan => Operator::LessThanEqual,
            Operator::LessThanEqual => Operator::GreaterThan,
            Operator::GreaterThanEqual => Operator::LessThan,
            Operator::LessThan => Operator::GreaterThanEqual,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FilterValue {
    String(String),
    Number(f64),
    Integer(i64),
}

impl FilterValue {
    fn type_name(&self) -> &'static str {
        match self {
            FilterValue::String(_) => "String",
            FilterValue::Number(_) => "Number",
            FilterValue::Integer(_) => "Integer",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub enum Filter {
    #[default]
    NoOp,
    Include {
        operator: Operator,
        value: FilterValue,
    },
    Exclude {
        operator: Operator,
        value: FilterValue,
    },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Interpolation {
    #[default]
    Linear,
    Logarithmic,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

impl Direction {
    fn keyword(&self) -> &'static str {
        match self {
            Direction::Ascending => "ASC",
            Direction::Descending => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    #[default]
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl Aggregate {
    fn function(&self) -> &'static str {
        match self {
            Aggregate::Sum => "SUM",
            Aggregate::Avg => "AVG",
            Aggregate::Min => "MIN",
            Aggregate::Max => "MAX",
            Aggregate::Count => "COUNT",
        }
    }

    fn requires_number(&self) -> bool {
        matches!(self, Aggregate::Sum | Aggregate::Avg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    fn alias(&self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.alias())
    }
}

/// One axis of a glyph query.
///
/// Filters are written as single-key maps (`filter: {Include: {operator, value: {Number: 5.0}}}`)
/// in both YAML and JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AxisBinding {
    pub column: String,
    #[serde(default)]
    pub interpolation: Interpolation,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub filter: Filter,
}

impl AxisBinding {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            interpolation: Interpolation::default(),
            direction: Direction::default(),
            filter: Filter::NoOp,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AxisBindings {
    pub x: AxisBinding,
    pub y: AxisBinding,
    pub z: AxisBinding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<Aggregate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompiledQuery {
    pub query_text: String,
    pub bounds_query_text: String,
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn mismatch(column: &str, value: &FilterValue, field_type: FieldType) -> Error {
    Error::invalid_field(
        column,
        format!(
            "{} filter value does not match the column's {} type",
            value.type_name(),
            field_type
        ),
    )
}

fn filter_literal(column: &str, field_type: FieldType, value: &FilterValue) -> Result<String> {
    match (value, field_type) {
        (FilterValue::String(text), FieldType::String) => Ok(quote_literal(text)),
        (FilterValue::Number(number), FieldType::Number) => {
            if number.is_finite() {
                Ok(format!("{number:?}"))
            } else {
                Err(Error::invalid_field(
                    column,
                    format!("filter value {number} is not a finite number"),
                ))
            }
        }
        (FilterValue::Integer(number), FieldType::Number) => Ok(number.to_string()),
        (FilterValue::String(text), FieldType::Date) => {
            let trimmed = text.trim();
            match DateChecker.checks(trimmed).then(|| DateChecker.convert(trimmed)) {
                Some(Ok(FieldValue::Date(at))) => Ok(format!(
                    "TIMESTAMP '{}'",
                    at.format("%Y-%m-%d %H:%M:%S%.f")
                )),
                _ => Err(Error::invalid_field(
                    column,
                    format!("filter value '{text}' is not a valid date"),
                )),
            }
        }
        _ => Err(mismatch(column, value, field_type)),
    }
}

/// WHERE fragment for one filter over `column`, or `None` for `NoOp`.
pub fn filter_clause(column: &str, field_type: FieldType, filter: &Filter) -> Result<Option<String>> {
    let (operator, value) = match filter {
        Filter::NoOp => return Ok(None),
        Filter::Include { operator, value } => (*operator, value),
        Filter::Exclude { operator, value } => (operator.negate(), value),
    };
    let literal = filter_literal(column, field_type, value)?;
    Ok(Some(format!(
        "{} {} {literal}",
        quote_identifier(column),
        operator.symbol()
    )))
}

struct CompiledAxis {
    select: String,
    group_by: Option<String>,
    order_by: String,
    filter: Option<String>,
}

/// Stateless compiler; safe to share across threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryCompiler {
    default_aggregate: Aggregate,
}

impl QueryCompiler {
    pub fn new(default_aggregate: Aggregate) -> Self {
        Self { default_aggregate }
    }

    pub fn compile(&self, bindings: &AxisBindings, view: &ViewDefinition) -> Result<CompiledQuery> {
        let aggregate = bindings.aggregate.unwrap_or(self.default_aggregate);
        let axes = [
            compile_axis(Axis::X, &bindings.x, view, None)?,
            compile_axis(Axis::Y, &bindings.y, view, None)?,
            compile_axis(Axis::Z, &bindings.z, view, Some(aggregate))?,
        ];

        let select = axes
            .iter()
            .map(|axis| axis.select.as_str())
            .chain(std::iter::once("COUNT(*) AS \"count\""))
            .join(",\n  ");
        let mut grouped = format!(
            "SELECT\n  {select}\nFROM {}",
            quote_identifier(&view.name)
        );
        let filters: Vec<&str> = axes.iter().filter_map(|a| a.filter.as_deref()).collect();
        if !filters.is_empty() {
            grouped.push_str(&format!("\nWHERE {}", filters.join(" AND ")));
        }
        let group_by: Vec<&str> = axes.iter().filter_map(|a| a.group_by.as_deref()).collect();
        grouped.push_str(&format!("\nGROUP BY {}", group_by.join(", ")));

        let order_by = axes
            .iter()
            .map(|a| a.order_by.as_str())
            .join(", ");
        let query_text = format!("{grouped}\nORDER BY {order_by}");

        let bounds = [Axis::X, Axis::Y, Axis::Z]
            .iter()
            .map(|axis| {
                format!(
                    "MIN({alias}) AS {min}, MAX({alias}) AS {max}",
                    alias = quote_identifier(axis.alias()),
                    min = quote_identifier(&format!("min_{axis}")),
                    max = quote_identifier(&format!("max_{axis}"))
                )
            })
            .join(",\n  ");
        let bounds_query_text =
            format!("SELECT\n  {bounds}\nFROM (\n{grouped}\n) AS \"glyphs\"");

        Ok(CompiledQuery {
            query_text,
            bounds_query_text,
        })
    }
}

fn compile_axis(
    axis: Axis,
    binding: &AxisBinding,
    view: &ViewDefinition,
    aggregate: Option<Aggregate>,
) -> Result<CompiledAxis> {
    let column = binding.column.as_str();
    let field_type = view.column_type(column).ok_or_else(|| {
        Error::invalid_field(
            column,
            format!("{axis} axis column is not part of view '{}'", view.name),
        )
    })?;
    let quoted = quote_identifier(column);

    let (value, group_by) = match aggregate {
        None => (quoted.clone(), Some(quoted)),
        Some(aggregate) => {
            if aggregate.requires_number() && field_type != FieldType::Number {
                return Err(Error::invalid_field(
                    column,
                    format!(
                        "{} needs a NUMBER column but '{column}' is {field_type}",
                        aggregate.function()
                    ),
                ));
            }
            (format!("{}({quoted})", aggregate.function()), None)
        }
    };

    let value = match binding.interpolation {
        Interpolation::Linear => value,
        Interpolation::Logarithmic => {
            let numeric = match aggregate {
                Some(Aggregate::Count) => true,
                _ => field_type == FieldType::Number,
            };
            if !numeric {
                return Err(Error::invalid_field(
                    column,
                    format!("logarithmic interpolation needs a NUMBER column but '{column}' is {field_type}"),
                ));
            }
            format!("LOG10({value})")
        }
    };

    let filter = filter_clause(column, field_type, &binding.filter)?;
    let alias = quote_identifier(axis.alias());
    Ok(CompiledAxis {
        select: format!("{value} AS {alias}"),
        group_by,
        order_by: format!("{alias} {}", binding.direction.keyword()),
        filter,
    })
}
