//! Refinement
//!
//! Single-shot correction: a failed query and the engine's error text go to the
//! model, a replacement query comes back. Fail-soft: any model or extraction
//! failure hands back the original query.

use crate::execution_loop::error_classifier::{ErrorClassifier, SqlErrorClass};
use crate::extractor::extract;
use crate::llm::ModelClient;
use crate::prompt::OutputConvention;
use crate::schema::DatabaseName;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What one refinement call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefinementOutcome {
    /// Replacement query, or the original when nothing usable came back.
    pub query: String,
    pub model_response: Option<String>,
    pub error_class: SqlErrorClass,
    /// False when the original query was returned unchanged.
    pub refined: bool,
}

pub struct Refiner {
    model: Arc<dyn ModelClient>,
    database: DatabaseName,
    convention: OutputConvention,
    classifier: ErrorClassifier,
    timeout: Option<Duration>,
}

impl Refiner {
    pub fn new(model: Arc<dyn ModelClient>, database: DatabaseName) -> Self {
        Self {
            model,
            database,
            convention: OutputConvention::FencedBlock,
            classifier: ErrorClassifier::new(),
            timeout: None,
        }
    }

    pub fn with_convention(mut self, convention: OutputConvention) -> Self {
        self.convention = convention;
        self
    }

    /// Bound each model call. Unbounded when unset.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn database(&self) -> &DatabaseName {
        &self.database
    }

    pub fn classify(&self, error: &str) -> SqlErrorClass {
        self.classifier.classify(error)
    }

    pub fn build_refinement_prompt(&self, query: &str, error: &str, error_class: SqlErrorClass) -> String {
        let mut parts = Vec::new();

        parts.push(format!(
            "You are an expert in SQL Server. The following query failed when executed against the database {}.",
            self.database
        ));
        parts.push(format!("\nFailed query:\n{}", query));
        parts.push(format!("\nError message from SQL Server:\n{}", error));
        parts.push(format!("\nError category: {}", error_class));
        parts.push(format!("Hint: {}", error_class.hint()));
        parts.push(format!(
            "\nReturn a corrected SQL Server query that fixes this error. Keep every table reference in the form [{}].[SCHEMA_NAME].[TABLE_NAME]. Use TOP instead of LIMIT. Return exactly one query.",
            self.database
        ));
        parts.push(self.convention.instruction().to_string());

        parts.join("\n")
    }

    /// Corrected query, or `query` unchanged.
    pub async fn refine(&self, query: &str, error: &str) -> String {
        self.refine_detailed(query, error).await.query
    }

    pub async fn refine_detailed(&self, query: &str, error: &str) -> RefinementOutcome {
        let error_class = self.classifier.classify(error);
        let prompt = self.build_refinement_prompt(query, error, error_class);
        debug!("Refinement prompt:\n{}", prompt);

        let unchanged = |model_response: Option<String>| RefinementOutcome {
            query: query.to_string(),
            model_response,
            error_class,
            refined: false,
        };

        let response = match self.call_model(&prompt).await {
            Ok(text) => text,
            Err(reason) => {
                warn!("Refinement model call failed, keeping the previous query: {}", reason);
                return unchanged(None);
            }
        };
        debug!("Refinement response:\n{}", response);

        match extract(&response).query {
            Some(refined) => {
                info!("Model proposed a corrected query ({})", error_class);
                RefinementOutcome {
                    query: refined,
                    model_response: Some(response),
                    error_class,
                    refined: true,
                }
            }
            None => {
                warn!("No query in refinement response, keeping the previous query");
                unchanged(Some(response))
            }
        }
    }

    async fn call_model(&self, prompt: &str) -> std::result::Result<String, String> {
        let call = self.model.generate(prompt);
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| format!("no reply within {:?}", limit))?,
            None => call.await,
        };
        result.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BridgeError, Result};
    use async_trait::async_trait;

    struct FixedModel(Result<&'static str>);

    #[async_trait]
    impl ModelClient for FixedModel {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            match &self.0 {
                Ok(text) => Ok(text.to_string()),
                Err(e) => Err(BridgeError::ModelUnavailable(e.to_string())),
            }
        }
    }

    fn refiner(reply: Result<&'static str>) -> Refiner {
        Refiner::new(Arc::new(FixedModel(reply)), DatabaseName::new("Sales").unwrap())
    }

    #[tokio::test]
    async fn test_refine_returns_extracted_query() {
        let refiner = refiner(Ok("```sql\nSELECT TOP 5 * FROM Orders\n```"));
        let outcome = refiner
            .refine_detailed("SELECT * FROM Orders LIMIT 5", "Incorrect syntax near 'LIMIT'.")
            .await;
        assert_eq!(outcome.query, "SELECT TOP 5 * FROM Orders");
        assert_eq!(outcome.error_class, SqlErrorClass::LimitSyntax);
        assert!(outcome.refined);
    }

    #[tokio::test]
    async fn test_refine_is_fail_soft_on_unusable_reply() {
        let refiner = refiner(Ok("I am sorry, I cannot generate a fix."));
        let query = refiner.refine("SELECT * FROM Nope", "Invalid object name 'Nope'.").await;
        assert_eq!(query, "SELECT * FROM Nope");
    }

    #[tokio::test]
    async fn test_apologetic_correction_is_used() {
        let refiner = refiner(Ok("I am sorry, the table name was wrong.\nSELECT * FROM Orders;"));
        let outcome = refiner.refine_detailed("SELECT * FROM Order", "Invalid object name 'Order'.").await;
        assert_eq!(outcome.query, "SELECT * FROM Orders");
        assert!(outcome.refined);
    }

    #[tokio::test]
    async fn test_refine_is_fail_soft_on_model_error() {
        let refiner = refiner(Err(BridgeError::ModelUnavailable("connection refused".into())));
        let outcome = refiner.refine_detailed("SELECT 1", "boom").await;
        assert_eq!(outcome.query, "SELECT 1");
        assert!(outcome.model_response.is_none());
        assert!(!outcome.refined);
    }

    #[test]
    fn test_prompt_embeds_query_error_and_hint() {
        let refiner = refiner(Ok("")).with_convention(OutputConvention::QuotedSentence);
        let prompt = refiner.build_refinement_prompt(
            "SELECT Foo FROM [Sales].[dbo].[T]",
            "Invalid column name 'Foo'.",
            SqlErrorClass::InvalidColumnName,
        );
        assert!(prompt.contains("SELECT Foo FROM [Sales].[dbo].[T]"));
        assert!(prompt.contains("Invalid column name 'Foo'."));
        assert!(prompt.contains(SqlErrorClass::InvalidColumnName.hint()));
        assert!(prompt.contains("[Sales].[SCHEMA_NAME].[TABLE_NAME]"));
        assert!(prompt.contains("Your SQL Query will be like"));
    }
}
