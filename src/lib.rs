//! Natural-language-to-SQL bridge for SQL Server.
//!
//! A question and an extracted schema go in; a single fully qualified
//! SQL Server query comes out, optionally executed with bounded refinement
//! through a caller-supplied driver.

pub mod api;
pub mod config;
pub mod error;
pub mod execution_loop;
pub mod executor;
pub mod extractor;
pub mod llm;
pub mod normalizer;
pub mod pipeline;
pub mod prompt;
pub mod schema;
pub mod schema_formatter;

pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use execution_loop::{ExecutionReport, RefinementAttempt, RefinementLoop, Refiner};
pub use executor::{QueryExecutor, QueryRows};
pub use extractor::{extract, ExtractionResult, ExtractionSource};
pub use llm::{ModelClient, OllamaClient};
pub use normalizer::normalize;
pub use pipeline::{GeneratedQuery, QueryPipeline, QuestionClassifier};
pub use schema::{ConnectionConfig, DatabaseName, SchemaDescription};
