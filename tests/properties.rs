use csv_glyph::column_name::normalize_column_name;
use csv_glyph::field_type::{ColumnDefinition, FieldType};
use csv_glyph::file_stats::FileStats;
use csv_glyph::join::JoinTablePlanner;
use csv_glyph::query::{Filter, FilterValue, Operator, filter_clause};
use csv_glyph::table_sorter::TableSorter;
use csv_glyph::view::{JoinKind, ViewQueryPlanner};
use proptest::prelude::*;
use proptest::sample::select;

fn field_type() -> impl Strategy<Value = FieldType> {
    select(vec![FieldType::String, FieldType::Number, FieldType::Date, FieldType::Unknown])
}

fn stats_strategy() -> impl Strategy<Value = FileStats> {
    (
        "[a-c]{1,2}",
        "[a-c]{1,2}\\.csv",
        0usize..5,
        0u64..50,
        prop::collection::vec(("[k-m]", field_type()), 1..4),
    )
        .prop_map(|(table, file, rows, size, columns)| {
            let columns: Vec<ColumnDefinition> = columns
                .into_iter()
                .map(|(name, field_type)| ColumnDefinition {
                    original_name: name.clone(),
                    name,
                    field_type,
                    longest_string: (field_type == FieldType::String).then_some(4),
                })
                .collect();
            FileStats {
                file_name: file,
                table_name: table,
                number_of_rows: rows,
                number_of_columns: columns.len(),
                columns,
                file_size: size,
            }
        })
}

fn operator() -> impl Strategy<Value = Operator> {
    select(vec![
        Operator::Equal,
        Operator::NotEqual,
        Operator::GreaterThan,
        Operator::GreaterThanEqual,
        Operator::LessThan,
        Operator::LessThanEqual,
    ])
}

proptest! {
    #[test]
    fn sorter_ignores_input_order(
        (tables, shuffled) in prop::collection::vec(stats_strategy(), 0..6)
            .prop_flat_map(|tables| {
                let shuffled = Just(tables.clone()).prop_shuffle();
                (Just(tables), shuffled)
            })
    ) {
        let mut sorter = TableSorter::new();
        let first = sorter.sort_tables(&tables);
        let second = TableSorter::new().sort_tables(&shuffled);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(sorter.sorted_tables().unwrap(), first.as_slice());
    }

    #[test]
    fn planning_is_reproducible_for_any_upload_order(
        (tables, shuffled) in prop::collection::vec(stats_strategy(), 1..5)
            .prop_flat_map(|tables| {
                let shuffled = Just(tables.clone()).prop_shuffle();
                (Just(tables), shuffled)
            })
    ) {
        let plan = |input: &[FileStats]| {
            let sorted = TableSorter::new().sort_tables(input);
            JoinTablePlanner::new("ws", "m").plan(&sorted).map(|p| p.tables)
        };
        match (plan(&tables), plan(&shuffled)) {
            (Ok(left), Ok(right)) => {
                prop_assert_eq!(&left, &right);
                let mut planner = ViewQueryPlanner::new(JoinKind::Left);
                let first = planner.define_view("ws_m_view", &left).map(|d| d.statement.clone());
                let again = planner.define_view("ws_m_view", &right).map(|d| d.statement.clone());
                prop_assert_eq!(first.is_ok(), again.is_ok());
                if let (Ok(first), Ok(again)) = (first, again) {
                    prop_assert_eq!(first, again);
                }
            }
            (Err(left), Err(right)) => prop_assert_eq!(left.kind(), right.kind()),
            (left, right) => prop_assert!(false, "diverging plans {:?} / {:?}", left.is_ok(), right.is_ok()),
        }
    }

    #[test]
    fn normalizer_is_idempotent_and_storage_safe(raw in "\\PC{0,24}") {
        let once = normalize_column_name(&raw);
        prop_assert_eq!(normalize_column_name(&once), once.clone());
        prop_assert!(once.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn exclude_is_the_negation_of_include(op in operator(), value in -1.0e6f64..1.0e6) {
        let value = FilterValue::Number(value);
        let include = filter_clause("x", FieldType::Number, &Filter::Include { operator: op, value: value.clone() })
            .unwrap()
            .unwrap();
        let exclude = filter_clause("x", FieldType::Number, &Filter::Exclude { operator: op, value: value.clone() })
            .unwrap()
            .unwrap();
        let negated = filter_clause("x", FieldType::Number, &Filter::Include { operator: op.negate(), value })
            .unwrap()
            .unwrap();
        prop_assert_eq!(&exclude, &negated);
        prop_assert_ne!(&include, &exclude);
        prop_assert_eq!(filter_clause("x", FieldType::Number, &Filter::NoOp).unwrap(), None);
    }
}
