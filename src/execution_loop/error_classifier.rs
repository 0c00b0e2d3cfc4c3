//! Error Classifier
//!
//! Sorts SQL Server error text into a small taxonomy so the refinement prompt
//! can carry a targeted hint next to the verbatim message.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlErrorClass {
    InvalidObjectName,
    InvalidColumnName,
    AmbiguousColumn,
    OrderByInSubquery,
    LimitSyntax,
    GroupByViolation,
    SyntaxError,
    Other,
}

impl fmt::Display for SqlErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlErrorClass::InvalidObjectName => write!(f, "InvalidObjectName"),
            SqlErrorClass::InvalidColumnName => write!(f, "InvalidColumnName"),
            SqlErrorClass::AmbiguousColumn => write!(f, "AmbiguousColumn"),
            SqlErrorClass::OrderByInSubquery => write!(f, "OrderByInSubquery"),
            SqlErrorClass::LimitSyntax => write!(f, "LimitSyntax"),
            SqlErrorClass::GroupByViolation => write!(f, "GroupByViolation"),
            SqlErrorClass::SyntaxError => write!(f, "SyntaxError"),
            SqlErrorClass::Other => write!(f, "Other"),
        }
    }
}

impl SqlErrorClass {
    /// Corrective hint for the refinement prompt.
    pub fn hint(&self) -> &'static str {
        match self {
            SqlErrorClass::InvalidObjectName => {
                "A table reference does not exist. Use only tables from the schema, written as [DATABASE_NAME].[SCHEMA_NAME].[TABLE_NAME]."
            }
            SqlErrorClass::InvalidColumnName => {
                "A column does not exist on the referenced table. Use only column names listed in the schema."
            }
            SqlErrorClass::AmbiguousColumn => {
                "A column name exists in more than one joined table. Prefix every column with its table alias."
            }
            SqlErrorClass::OrderByInSubquery => {
                "ORDER BY is not allowed in subqueries, CTEs, derived tables or views unless TOP, OFFSET or FOR XML is also specified. Move the ORDER BY to the outermost query."
            }
            SqlErrorClass::LimitSyntax => {
                "SQL Server does not support LIMIT. Use SELECT TOP n or OFFSET ... FETCH NEXT n ROWS ONLY."
            }
            SqlErrorClass::GroupByViolation => {
                "Every selected column that is not aggregated must appear in the GROUP BY clause."
            }
            SqlErrorClass::SyntaxError => {
                "The query has a syntax error. Check keywords, commas, parentheses and quoting against SQL Server syntax."
            }
            SqlErrorClass::Other => "Review the query against the error message and fix the cause.",
        }
    }
}

/// Error classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify engine error text
    pub fn classify(&self, error_text: &str) -> SqlErrorClass {
        let msg = error_text.to_lowercase();

        if msg.contains("invalid object name") {
            return SqlErrorClass::InvalidObjectName;
        }

        if msg.contains("invalid column name") {
            return SqlErrorClass::InvalidColumnName;
        }

        if msg.contains("ambiguous column name") {
            return SqlErrorClass::AmbiguousColumn;
        }

        if msg.contains("order by clause is invalid in") {
            return SqlErrorClass::OrderByInSubquery;
        }

        if msg.contains("near 'limit'") || (msg.contains("limit") && msg.contains("syntax")) {
            return SqlErrorClass::LimitSyntax;
        }

        if msg.contains("not contained in either an aggregate function or the group by clause") {
            return SqlErrorClass::GroupByViolation;
        }

        if msg.contains("incorrect syntax") || msg.contains("syntax error") {
            return SqlErrorClass::SyntaxError;
        }

        SqlErrorClass::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_invalid_object_name() {
        let classifier = ErrorClassifier::new();
        let error = "[42S02] [Microsoft][ODBC Driver 17 for SQL Server][SQL Server]Invalid object name 'Customers'. (208)";
        assert_eq!(classifier.classify(error), SqlErrorClass::InvalidObjectName);
    }

    #[test]
    fn test_classify_order_by_in_subquery() {
        let classifier = ErrorClassifier::new();
        let error = "The ORDER BY clause is invalid in views, inline functions, derived tables, subqueries, and common table expressions, unless TOP, OFFSET or FOR XML is also specified.";
        assert_eq!(classifier.classify(error), SqlErrorClass::OrderByInSubquery);
    }

    #[test]
    fn test_limit_wins_over_generic_syntax() {
        let classifier = ErrorClassifier::new();
        assert_eq!(classifier.classify("Incorrect syntax near 'LIMIT'."), SqlErrorClass::LimitSyntax);
        assert_eq!(classifier.classify("Incorrect syntax near ','."), SqlErrorClass::SyntaxError);
    }

    #[test]
    fn test_classify_group_by_and_other() {
        let classifier = ErrorClassifier::new();
        let error = "Column 'dbo.Orders.Region' is invalid in the select list because it is not contained in either an aggregate function or the GROUP BY clause.";
        assert_eq!(classifier.classify(error), SqlErrorClass::GroupByViolation);
        assert_eq!(classifier.classify("Login failed for user 'sa'."), SqlErrorClass::Other);
    }
}
