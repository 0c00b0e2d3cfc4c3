//! Schema Formatter
//!
//! Renders a [`SchemaDescription`] as the compact text block embedded in prompts,
//! and derives a handful of illustrative question/SQL pairs from it.

use crate::schema::{bracket, ColumnInfo, SchemaDescription, TableInfo};
use serde::{Deserialize, Serialize};

pub const SCHEMA_HEADER: &str = "### Database Schema:";
pub const NO_TABLES_TEXT: &str = "No tables found in the database.";
pub const NO_EXAMPLES_TEXT: &str = "No tables available to generate examples.";

/// Tables beyond this many get no "count records" example.
pub const MAX_EXAMPLE_TABLES: usize = 20;

const CHARACTER_TYPES: &[&str] = &["varchar", "nvarchar", "char", "nchar"];

/// An illustrative natural-language question and its SQL answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleQuery {
    pub question: String,
    pub sql: String,
}

impl ExampleQuery {
    fn new(question: String, sql: String) -> Self {
        Self { question, sql }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedSchema {
    pub schema_text: String,
    pub examples: Vec<ExampleQuery>,
}

pub struct SchemaFormatter;

impl SchemaFormatter {
    pub fn format(schema: &SchemaDescription) -> FormattedSchema {
        FormattedSchema {
            schema_text: Self::schema_block(schema),
            examples: Self::example_queries(schema),
        }
    }

    /// Header followed by one `Table:` line per table and an indented line per column.
    pub fn schema_block(schema: &SchemaDescription) -> String {
        let mut output = format!("{}\n\n", SCHEMA_HEADER);

        if schema.tables.is_empty() {
            output.push_str(NO_TABLES_TEXT);
            return output;
        }

        for table in &schema.tables {
            output.push_str(&format!("Table: {}\n", table.fully_qualified_name));
            for column in &table.columns {
                output.push_str(&format!(
                    "  - {} ({}){}\n",
                    column.name,
                    column.data_type,
                    if column.is_primary_key { " (PK)" } else { "" }
                ));
            }
        }

        output
    }

    pub fn example_queries(schema: &SchemaDescription) -> Vec<ExampleQuery> {
        let mut examples = Vec::new();

        for table in schema.tables.iter().take(MAX_EXAMPLE_TABLES) {
            examples.push(ExampleQuery::new(
                format!("Calculate the total number of records in {}?", table.display_name),
                format!("SELECT COUNT(*) AS TotalRecords FROM {}", table.fully_qualified_name),
            ));
        }

        if schema.tables.len() < 2 {
            return examples;
        }

        let first = &schema.tables[0];
        let second = &schema.tables[1];

        examples.push(ExampleQuery::new(
            format!("Show me the top 10 records from {}?", first.display_name),
            format!("SELECT TOP 10 * FROM {}", first.fully_qualified_name),
        ));

        let (left, right) = join_columns(first, second);
        examples.push(ExampleQuery::new(
            format!("Join {} with {}?", first.display_name, second.display_name),
            format!(
                "SELECT t1.*, t2.*\nFROM {} t1\nJOIN {} t2 ON t1.{} = t2.{}",
                first.fully_qualified_name,
                second.fully_qualified_name,
                bracket(&left),
                bracket(&right)
            ),
        ));

        let grouping = [first, second].into_iter().find_map(|table| {
            table
                .columns
                .iter()
                .find(|c| is_character_type(c))
                .map(|c| (table, c))
        });
        if let Some((table, column)) = grouping {
            let col = bracket(&column.name);
            examples.push(ExampleQuery::new(
                format!("Group records in {} by {}?", table.display_name, column.name),
                format!(
                    "SELECT {col}, COUNT(*) AS Count\nFROM {}\nGROUP BY {col}\nORDER BY Count DESC",
                    table.fully_qualified_name
                ),
            ));
        }

        examples
    }
}

fn is_character_type(column: &ColumnInfo) -> bool {
    let ty = column.data_type.to_ascii_lowercase();
    CHARACTER_TYPES.iter().any(|t| ty == *t)
}

/// Best-effort join columns for the illustrative join example.
///
/// A shared column name wins. Otherwise each side independently prefers its
/// primary key, then anything that looks like an id or key, then its first column.
fn join_columns(left: &TableInfo, right: &TableInfo) -> (String, String) {
    for l in &left.columns {
        if let Some(r) = right.columns.iter().find(|r| r.name.eq_ignore_ascii_case(&l.name)) {
            return (l.name.clone(), r.name.clone());
        }
    }
    (side_join_column(left), side_join_column(right))
}

fn side_join_column(table: &TableInfo) -> String {
    table
        .primary_key_columns()
        .next()
        .or_else(|| {
            table.columns.iter().find(|c| {
                let name = c.name.to_ascii_lowercase();
                name.contains("id") || name.contains("key")
            })
        })
        .or_else(|| table.columns.first())
        .map(|c| c.name.clone())
        .unwrap_or_else(|| "ID".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DatabaseName, DEFAULT_SCHEMA};

    fn sales() -> DatabaseName {
        DatabaseName::new("Sales").unwrap()
    }

    fn table(name: &str, columns: &[(&str, &str, bool)]) -> TableInfo {
        columns.iter().fold(
            TableInfo::new(&sales(), DEFAULT_SCHEMA, name, DEFAULT_SCHEMA),
            |t, (c, ty, pk)| t.with_column(ColumnInfo::new(*c, *ty, *pk)),
        )
    }

    #[test]
    fn test_schema_block_layout() {
        let schema = SchemaDescription::new(&sales()).with_table(table(
            "Customers",
            &[("CustomerId", "int", true), ("Name", "nvarchar", false)],
        ));
        let block = SchemaFormatter::schema_block(&schema);
        assert_eq!(
            block,
            "### Database Schema:\n\nTable: [Sales].[dbo].[Customers]\n  - CustomerId (int) (PK)\n  - Name (nvarchar)\n"
        );
    }

    #[test]
    fn test_empty_schema() {
        let formatted = SchemaFormatter::format(&SchemaDescription::new(&sales()));
        assert!(formatted.schema_text.ends_with(NO_TABLES_TEXT));
        assert!(formatted.examples.is_empty());
    }

    #[test]
    fn test_single_table_only_gets_count_example() {
        let schema = SchemaDescription::new(&sales()).with_table(table("Customers", &[("Id", "int", true)]));
        let examples = SchemaFormatter::example_queries(&schema);
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].sql, "SELECT COUNT(*) AS TotalRecords FROM [Sales].[dbo].[Customers]");
    }

    #[test]
    fn test_count_examples_are_capped() {
        let mut schema = SchemaDescription::new(&sales());
        for i in 0..25 {
            schema = schema.with_table(table(&format!("T{}", i), &[("Id", "int", true)]));
        }
        let examples = SchemaFormatter::example_queries(&schema);
        let counts = examples.iter().filter(|e| e.sql.contains("COUNT(*) AS TotalRecords")).count();
        assert_eq!(counts, MAX_EXAMPLE_TABLES);
        assert!(examples.iter().any(|e| e.sql.starts_with("SELECT TOP 10")));
    }

    #[test]
    fn test_join_prefers_shared_column_name() {
        let customers = table("Customers", &[("Id", "int", true), ("CustomerKey", "int", false)]);
        let orders = table("Orders", &[("OrderId", "int", true), ("customerkey", "int", false)]);
        assert_eq!(join_columns(&customers, &orders), ("CustomerKey".to_string(), "customerkey".to_string()));
    }

    #[test]
    fn test_join_falls_back_to_primary_keys_then_id_columns_then_first() {
        let a = table("A", &[("Name", "nvarchar", false), ("Code", "int", true)]);
        let b = table("B", &[("Label", "nvarchar", false), ("ParentKey", "int", false)]);
        assert_eq!(join_columns(&a, &b), ("Code".to_string(), "ParentKey".to_string()));

        let c = table("C", &[("Alpha", "int", false)]);
        let d = table("D", &[]);
        assert_eq!(join_columns(&c, &d), ("Alpha".to_string(), "ID".to_string()));
    }

    #[test]
    fn test_group_by_example_uses_first_character_column() {
        let schema = SchemaDescription::new(&sales())
            .with_table(table("Customers", &[("Id", "int", true), ("Region", "varchar", false)]))
            .with_table(table("Orders", &[("OrderId", "int", true)]));
        let examples = SchemaFormatter::example_queries(&schema);
        let group = examples.last().unwrap();
        assert!(group.question.contains("by Region"));
        assert!(group.sql.contains("GROUP BY [Region]"));
    }
}
