//! Query Executor boundary
//!
//! The crate ships no SQL Server driver. Callers plug one in through
//! [`QueryExecutor`]; the refinement loop only sees rows or verbatim engine text.

use crate::error::Result;
use crate::schema::ConnectionConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row: column name to value.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryRows {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Enforce the row cap. Returns true if rows were dropped.
    pub fn truncate(&mut self, max_rows: usize) -> bool {
        let dropped = self.rows.len() > max_rows;
        self.rows.truncate(max_rows);
        dropped
    }
}

/// Runs a normalized query. Failures must be `BridgeError::Execution` carrying
/// the engine's error text verbatim.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &str, connection: &ConnectionConfig, max_rows: usize) -> Result<QueryRows>;
}
