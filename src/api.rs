//! SQL Bridge API
//!
//! Request/response shapes for the outer surfaces and the handlers that map
//! them onto [`QueryPipeline`]. Transport-agnostic: the HTTP front and tests
//! both call these directly.

use crate::config::DEFAULT_MAX_ROWS;
use crate::error::{BridgeError, Result};
use crate::execution_loop::{ExecutionReport, RefinementAttempt};
use crate::executor::{QueryExecutor, Row};
use crate::pipeline::QueryPipeline;
use crate::schema::{ConnectionConfig, DatabaseName, SchemaDescription};
use crate::schema_formatter::SchemaFormatter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub question: String,
    #[serde(alias = "schema")]
    pub schema_context: SchemaDescription,
    /// Target database. Falls back to `schemaContext.database`.
    #[serde(default)]
    pub database: Option<String>,
    /// Caller-supplied example queries, used instead of generated ones.
    #[serde(default)]
    pub examples: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub query: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub query: String,
    #[serde(alias = "databaseInfo")]
    pub connection: ConnectionConfig,
    /// Row cap. Falls back to the API's configured default.
    #[serde(default)]
    pub max_rows: Option<usize>,
}

/// One refinement round as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refinement {
    pub query: String,
    pub error: Option<String>,
}

impl From<&RefinementAttempt> for Refinement {
    fn from(attempt: &RefinementAttempt) -> Self {
        Self {
            query: attempt.query.clone(),
            error: attempt.error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub query: String,
    pub results: Vec<Row>,
    pub refinements: Vec<Refinement>,
    /// Last engine error when every attempt failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecuteResponse {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl From<ExecutionReport> for ExecuteResponse {
    fn from(report: ExecutionReport) -> Self {
        let refinements = report.attempts().iter().map(Refinement::from).collect();
        match report {
            ExecutionReport::Succeeded { query, rows, .. } => Self {
                query,
                results: rows.rows,
                refinements,
                error: None,
            },
            ExecutionReport::Failed { query, last_error, .. } => Self {
                query,
                results: Vec::new(),
                refinements,
                error: Some(last_error),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefineRequest {
    pub query: String,
    pub error: String,
    pub database: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

impl From<&BridgeError> for ErrorResponse {
    fn from(error: &BridgeError) -> Self {
        Self {
            error: error.to_string(),
            status: error.status_code(),
        }
    }
}

/// API handler
pub struct SqlBridgeApi {
    pipeline: Arc<QueryPipeline>,
    default_max_rows: usize,
}

impl SqlBridgeApi {
    pub fn new(pipeline: Arc<QueryPipeline>) -> Self {
        Self {
            pipeline,
            default_max_rows: DEFAULT_MAX_ROWS,
        }
    }

    pub fn with_default_max_rows(mut self, max_rows: usize) -> Self {
        self.default_max_rows = max_rows;
        self
    }

    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        let database = match request.database.as_deref() {
            Some(name) if !name.trim().is_empty() => DatabaseName::new(name)?,
            _ => DatabaseName::new(request.schema_context.database.clone())?,
        };
        info!("Generate request for database {}", database);

        let generated = match request.examples.as_deref() {
            Some(examples) if !examples.trim().is_empty() => {
                let schema = request.schema_context.qualified_for(&database);
                let schema_text = SchemaFormatter::schema_block(&schema);
                self.pipeline
                    .generate_from_text(&request.question, &schema_text, examples, &database)
                    .await?
            }
            _ => {
                self.pipeline
                    .generate(&request.question, &request.schema_context, &database)
                    .await?
            }
        };

        Ok(GenerateResponse { query: generated.query })
    }

    pub async fn refine(&self, request: RefineRequest) -> Result<GenerateResponse> {
        let database = DatabaseName::new(request.database)?;
        if request.query.trim().is_empty() {
            return Err(BridgeError::InvalidRequest("query is required".to_string()));
        }
        let query = self.pipeline.refine(&request.query, &request.error, &database).await;
        Ok(GenerateResponse { query })
    }

    /// Execute through a caller-supplied driver. Exhausted refinement is reported
    /// in the response, not as an error.
    pub async fn execute(&self, request: ExecuteRequest, executor: &dyn QueryExecutor) -> Result<ExecuteResponse> {
        if request.query.trim().is_empty() {
            return Err(BridgeError::InvalidRequest("query is required".to_string()));
        }
        let max_rows = request.max_rows.unwrap_or(self.default_max_rows);
        let report = self
            .pipeline
            .execute(&request.query, executor, &request.connection, max_rows)
            .await?;
        Ok(ExecuteResponse::from(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_request_accepts_legacy_shape() {
        let json = r#"{
            "query": "SELECT 1",
            "databaseInfo": {"server": "localhost", "database": "Sales", "useWindowsAuth": true}
        }"#;
        let request: ExecuteRequest = serde_json::from_str(json).unwrap();
        assert!(request.max_rows.is_none());
        assert!(request.connection.use_windows_auth);
    }

    #[test]
    fn test_generate_request_shape() {
        let json = r#"{
            "question": "total number of records in Customers",
            "schemaContext": {"database": "Sales", "tables": [{"name": "Customers", "columns": []}]}
        }"#;
        let request: GenerateRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.schema_context.tables[0].name, "Customers");
        assert!(request.database.is_none());
    }

    #[test]
    fn test_error_response_carries_status() {
        let body = ErrorResponse::from(&BridgeError::Extraction("no SQL".into()));
        assert_eq!(body.status, 422);
        assert!(body.error.contains("no SQL"));
    }
}
