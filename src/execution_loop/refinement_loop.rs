//! Refinement Loop
//!
//! Bounded execute / refine / re-execute cycle. Only execution failures trigger
//! refinement, and at most `max_retries` refinements run per query.

use crate::config::MAX_RETRIES;
use crate::error::BridgeError;
use crate::execution_loop::error_classifier::{ErrorClassifier, SqlErrorClass};
use crate::execution_loop::refinement::Refiner;
use crate::executor::{QueryExecutor, QueryRows};
use crate::normalizer::normalize;
use crate::schema::ConnectionConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One refine-and-re-execute round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinementAttempt {
    pub attempt_number: usize,
    /// Normalized query produced by this round and executed.
    pub query: String,
    /// Execution error of `query`, `None` if it succeeded.
    pub error: Option<String>,
    pub model_response: Option<String>,
    pub error_class: Option<SqlErrorClass>,
    pub timestamp: DateTime<Utc>,
}

/// Terminal state of one generation-to-execution cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionReport {
    Succeeded {
        query: String,
        rows: QueryRows,
        attempts: Vec<RefinementAttempt>,
    },
    Failed {
        query: String,
        last_error: String,
        attempts: Vec<RefinementAttempt>,
    },
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionReport::Succeeded { .. })
    }

    /// Last query executed.
    pub fn query(&self) -> &str {
        match self {
            ExecutionReport::Succeeded { query, .. } | ExecutionReport::Failed { query, .. } => query,
        }
    }

    pub fn attempts(&self) -> &[RefinementAttempt] {
        match self {
            ExecutionReport::Succeeded { attempts, .. } | ExecutionReport::Failed { attempts, .. } => attempts,
        }
    }
}

/// Runs a query and, on engine errors, asks the model for a corrected query
/// up to `max_retries` times.
#[derive(Debug, Clone)]
pub struct RefinementLoop {
    max_retries: usize,
    abort_on_repeat_error: bool,
    error_classifier: ErrorClassifier,
}

impl Default for RefinementLoop {
    fn default() -> Self {
        Self::new(MAX_RETRIES)
    }
}

impl RefinementLoop {
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            abort_on_repeat_error: false,
            error_classifier: ErrorClassifier::new(),
        }
    }

    /// Stop early when consecutive failures share an error class.
    pub fn with_abort_on_repeat_error(mut self, abort: bool) -> Self {
        self.abort_on_repeat_error = abort;
        self
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Execute `query`, refining on failure until it succeeds or the bound is hit.
    pub async fn run(
        &self,
        query: String,
        refiner: &Refiner,
        executor: &dyn QueryExecutor,
        connection: &ConnectionConfig,
        max_rows: usize,
    ) -> ExecutionReport {
        let mut attempts: Vec<RefinementAttempt> = Vec::new();
        let mut current = query;

        info!("Executing query (initial attempt)");
        let mut last_error = match self.execute(executor, &current, connection, max_rows).await {
            Ok(rows) => {
                return ExecutionReport::Succeeded {
                    query: current,
                    rows,
                    attempts,
                }
            }
            Err(e) if is_refinable(&e) => e.engine_message(),
            Err(e) => {
                warn!("Execution failed without a query error, not refining: {}", e);
                return ExecutionReport::Failed {
                    query: current,
                    last_error: e.to_string(),
                    attempts,
                };
            }
        };
        let mut previous_class = Some(self.error_classifier.classify(&last_error));

        for attempt_number in 1..=self.max_retries {
            info!("Refinement attempt {} of {}", attempt_number, self.max_retries);

            let outcome = refiner.refine_detailed(&current, &last_error).await;
            let candidate = normalize(&outcome.query, refiner.database());

            match self.execute(executor, &candidate, connection, max_rows).await {
                Ok(rows) => {
                    info!("Execution succeeded after {} refinement(s)", attempt_number);
                    attempts.push(RefinementAttempt {
                        attempt_number,
                        query: candidate.clone(),
                        error: None,
                        model_response: outcome.model_response,
                        error_class: None,
                        timestamp: Utc::now(),
                    });
                    return ExecutionReport::Succeeded {
                        query: candidate,
                        rows,
                        attempts,
                    };
                }
                Err(e) => {
                    let refinable = is_refinable(&e);
                    let message = if refinable { e.engine_message() } else { e.to_string() };
                    let error_class = self.error_classifier.classify(&message);
                    warn!("Attempt {} failed ({}): {}", attempt_number, error_class, message);

                    attempts.push(RefinementAttempt {
                        attempt_number,
                        query: candidate.clone(),
                        error: Some(message.clone()),
                        model_response: outcome.model_response,
                        error_class: Some(error_class),
                        timestamp: Utc::now(),
                    });
                    current = candidate;
                    last_error = message;

                    if !refinable || self.should_abort(&error_class, &previous_class) {
                        break;
                    }
                    previous_class = Some(error_class);
                }
            }
        }

        warn!("Giving up after {} refinement attempt(s): {}", attempts.len(), last_error);
        ExecutionReport::Failed {
            query: current,
            last_error,
            attempts,
        }
    }

    async fn execute(
        &self,
        executor: &dyn QueryExecutor,
        query: &str,
        connection: &ConnectionConfig,
        max_rows: usize,
    ) -> crate::error::Result<QueryRows> {
        let mut rows = executor.execute(query, connection, max_rows).await?;
        if rows.truncate(max_rows) {
            warn!("Executor returned more than {} rows, truncated", max_rows);
        }
        info!("Query returned {} row(s)", rows.len());
        Ok(rows)
    }

    /// True when abort-on-repeat is enabled and this error has the same class
    /// as the previous one.
    fn should_abort(&self, current_error: &SqlErrorClass, previous_error: &Option<SqlErrorClass>) -> bool {
        if !self.abort_on_repeat_error {
            return false;
        }

        if let Some(prev) = previous_error {
            if prev == current_error {
                warn!("Same error repeated, aborting: {}", current_error);
                return true;
            }
        }

        false
    }
}

/// Query errors feed refinement. Boundary errors (bad connection settings) do not.
fn is_refinable(error: &BridgeError) -> bool {
    matches!(error, BridgeError::Execution(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::llm::ModelClient;
    use crate::schema::DatabaseName;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct EchoFix;

    #[async_trait]
    impl ModelClient for EchoFix {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok("```sql\nSELECT TOP 5 * FROM Orders\n```".to_string())
        }
    }

    /// Fails the first `failures` calls with the same engine text.
    struct FlakyExecutor {
        failures: usize,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
        message: &'static str,
    }

    impl FlakyExecutor {
        fn new(failures: usize, message: &'static str) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                message,
            }
        }
    }

    #[async_trait]
    impl QueryExecutor for FlakyExecutor {
        async fn execute(&self, query: &str, _connection: &ConnectionConfig, _max_rows: usize) -> Result<QueryRows> {
            self.seen.lock().unwrap().push(query.to_string());
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(BridgeError::Execution(self.message.to_string()))
            } else {
                let rows = (0..10)
                    .map(|i| {
                        let mut row = serde_json::Map::new();
                        row.insert("n".to_string(), serde_json::json!(i));
                        row
                    })
                    .collect();
                Ok(QueryRows::new(vec!["n".to_string()], rows))
            }
        }
    }

    fn refiner() -> Refiner {
        Refiner::new(Arc::new(EchoFix), DatabaseName::new("Sales").unwrap())
    }

    fn connection() -> ConnectionConfig {
        ConnectionConfig::windows_auth("localhost", "Sales")
    }

    #[tokio::test]
    async fn test_success_without_refinement() {
        let executor = FlakyExecutor::new(0, "");
        let report = RefinementLoop::default()
            .run("SELECT 1".to_string(), &refiner(), &executor, &connection(), 200)
            .await;
        assert!(report.is_success());
        assert!(report.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_refined_query_is_normalized_and_rows_capped() {
        let executor = FlakyExecutor::new(1, "Incorrect syntax near 'LIMIT'.");
        let report = RefinementLoop::default()
            .run("SELECT * FROM [Sales].[dbo].[Orders] LIMIT 5".to_string(), &refiner(), &executor, &connection(), 3)
            .await;

        match report {
            ExecutionReport::Succeeded { query, rows, attempts } => {
                assert_eq!(query, "SELECT TOP 5 * FROM [Sales].[dbo].[Orders]");
                assert_eq!(rows.len(), 3);
                assert_eq!(attempts.len(), 1);
                assert!(attempts[0].error.is_none());
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(executor.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_always_failing_executor_stops_at_bound() {
        let executor = FlakyExecutor::new(usize::MAX, "Invalid object name 'Orders'.");
        let report = RefinementLoop::default()
            .run("SELECT * FROM Orders".to_string(), &refiner(), &executor, &connection(), 200)
            .await;

        assert!(!report.is_success());
        assert_eq!(report.attempts().len(), MAX_RETRIES);
        let numbers: Vec<usize> = report.attempts().iter().map(|a| a.attempt_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        if let ExecutionReport::Failed { last_error, .. } = report {
            assert_eq!(last_error, "Invalid object name 'Orders'.");
        }
    }

    #[tokio::test]
    async fn test_abort_on_repeated_error_class() {
        let executor = FlakyExecutor::new(usize::MAX, "Invalid object name 'Orders'.");
        let report = RefinementLoop::default()
            .with_abort_on_repeat_error(true)
            .run("SELECT * FROM Orders".to_string(), &refiner(), &executor, &connection(), 200)
            .await;
        assert_eq!(report.attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_boundary_error_is_not_refined() {
        struct Refusing;

        #[async_trait]
        impl QueryExecutor for Refusing {
            async fn execute(&self, _q: &str, _c: &ConnectionConfig, _m: usize) -> Result<QueryRows> {
                Err(BridgeError::InvalidRequest("Missing username/password for SQL authentication.".into()))
            }
        }

        let report = RefinementLoop::default()
            .run("SELECT 1".to_string(), &refiner(), &Refusing, &connection(), 200)
            .await;
        assert!(!report.is_success());
        assert!(report.attempts().is_empty());
    }
}
