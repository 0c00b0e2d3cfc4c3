//! Query Pipeline
//!
//! question + schema -> prompt -> model -> extraction -> normalization, and on
//! request execution with bounded refinement. Each run is traced under its own
//! run id.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::execution_loop::{ExecutionReport, RefinementLoop, Refiner};
use crate::executor::QueryExecutor;
use crate::extractor::{extract, ExtractionSource};
use crate::llm::{ModelClient, OllamaClient};
use crate::normalizer::{normalize, normalize_detailed};
use crate::prompt::{PromptBuilder, PromptContext, RuleSet};
use crate::schema::{ConnectionConfig, DatabaseName, SchemaDescription};
use crate::schema_formatter::SchemaFormatter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// External "is this a database question" gate.
pub trait QuestionClassifier: Send + Sync {
    fn is_database_question(&self, question: &str) -> bool;
}

/// Accepts every question.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl QuestionClassifier for AcceptAll {
    fn is_database_question(&self, _question: &str) -> bool {
        true
    }
}

impl<F> QuestionClassifier for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_database_question(&self, question: &str) -> bool {
        self(question)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedQuery {
    /// Normalized, ready to execute.
    pub query: String,
    /// As extracted, before normalization.
    pub raw_query: String,
    pub thought: Option<String>,
    pub source: ExtractionSource,
}

pub struct QueryPipeline {
    model: Arc<dyn ModelClient>,
    prompt_builder: PromptBuilder,
    classifier: Arc<dyn QuestionClassifier>,
    refinement_loop: RefinementLoop,
    model_timeout: Duration,
}

impl QueryPipeline {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        let defaults = BridgeConfig::default();
        Self {
            model,
            prompt_builder: PromptBuilder::default(),
            classifier: Arc::new(AcceptAll),
            refinement_loop: RefinementLoop::new(defaults.max_retries),
            model_timeout: defaults.model_timeout,
        }
    }

    /// Pipeline backed by the configured Ollama endpoint.
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let model = OllamaClient::from_config(config)?;
        info!("Using model {} at {}", config.model, model.endpoint());
        Ok(Self::new(Arc::new(model))
            .with_model_timeout(config.model_timeout)
            .with_refinement_loop(RefinementLoop::new(config.max_retries)))
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.prompt_builder = PromptBuilder::new(rules);
        self
    }

    pub fn with_classifier(mut self, classifier: impl QuestionClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn with_refinement_loop(mut self, refinement_loop: RefinementLoop) -> Self {
        self.refinement_loop = refinement_loop;
        self
    }

    pub fn prompt_builder(&self) -> &PromptBuilder {
        &self.prompt_builder
    }

    /// Refiner for `database`, sharing this pipeline's model, convention and timeout.
    pub fn refiner(&self, database: &DatabaseName) -> Refiner {
        Refiner::new(Arc::clone(&self.model), database.clone())
            .with_convention(self.prompt_builder.rules().convention)
            .with_timeout(self.model_timeout)
    }

    /// Generate a normalized query for `question` against `schema`.
    pub async fn generate(
        &self,
        question: &str,
        schema: &SchemaDescription,
        database: &DatabaseName,
    ) -> Result<GeneratedQuery> {
        let run_id = Uuid::new_v4();
        let span = info_span!("generate", run_id = %run_id, database = %database);
        async {
            self.admit(question)?;
            let schema = schema.clone().qualified_for(database);
            let formatted = SchemaFormatter::format(&schema);
            info!(
                "Schema formatted: {} table(s), {} example(s)",
                schema.tables.len(),
                formatted.examples.len()
            );
            let context = self.prompt_builder.context(question, &formatted, database);
            self.generate_with_context(&context).await
        }
        .instrument(span)
        .await
    }

    /// Generate with caller-supplied schema and example text.
    pub async fn generate_from_text(
        &self,
        question: &str,
        schema_text: &str,
        examples_text: &str,
        database: &DatabaseName,
    ) -> Result<GeneratedQuery> {
        let run_id = Uuid::new_v4();
        let span = info_span!("generate", run_id = %run_id, database = %database);
        async {
            self.admit(question)?;
            let context = self
                .prompt_builder
                .context_from_text(question, schema_text, examples_text, database);
            self.generate_with_context(&context).await
        }
        .instrument(span)
        .await
    }

    /// Normalize `query` for the connection's database, execute it and refine on failure.
    pub async fn execute(
        &self,
        query: &str,
        executor: &dyn QueryExecutor,
        connection: &ConnectionConfig,
        max_rows: usize,
    ) -> Result<ExecutionReport> {
        let database = connection.validate()?;
        let run_id = Uuid::new_v4();
        let span = info_span!("execute", run_id = %run_id, database = %database);
        let report = async {
            let query = normalize(query, &database);
            let refiner = self.refiner(&database);
            self.refinement_loop
                .run(query, &refiner, executor, connection, max_rows)
                .await
        }
        .instrument(span)
        .await;
        Ok(report)
    }

    pub async fn generate_and_execute(
        &self,
        question: &str,
        schema: &SchemaDescription,
        executor: &dyn QueryExecutor,
        connection: &ConnectionConfig,
        max_rows: usize,
    ) -> Result<(GeneratedQuery, ExecutionReport)> {
        let database = connection.validate()?;
        let generated = self.generate(question, schema, &database).await?;
        let report = self.execute(&generated.query, executor, connection, max_rows).await?;
        Ok((generated, report))
    }

    /// Single-shot refinement, normalized. Returns `query` normalized if nothing better came back.
    pub async fn refine(&self, query: &str, error: &str, database: &DatabaseName) -> String {
        let refined = self.refiner(database).refine(query, error).await;
        normalize(&refined, database)
    }

    fn admit(&self, question: &str) -> Result<()> {
        if question.trim().is_empty() {
            return Err(BridgeError::InvalidRequest("question is required".to_string()));
        }
        if !self.classifier.is_database_question(question) {
            warn!("Question rejected as unrelated to the database");
            return Err(BridgeError::UnrelatedQuestion(question.trim().to_string()));
        }
        Ok(())
    }

    async fn generate_with_context(&self, context: &PromptContext) -> Result<GeneratedQuery> {
        let prompt = self.prompt_builder.build(context);
        info!("Prompt built ({} chars, rules {})", prompt.len(), self.prompt_builder.rules().version);
        debug!("Prompt:\n{}", prompt);

        info!("Calling model {}", self.model.model_name());
        let response = tokio::time::timeout(self.model_timeout, self.model.generate(&prompt))
            .await
            .map_err(|_| {
                BridgeError::ModelUnavailable(format!("no reply within {}s", self.model_timeout.as_secs()))
            })??;
        debug!("Model response:\n{}", response);

        let extraction = extract(&response);
        let source = extraction.source;
        let thought = extraction.thought.clone();
        let raw_query = extraction.into_result().map_err(|e| {
            warn!("Extraction failed: {}", e);
            e
        })?;
        let source = source.ok_or_else(|| BridgeError::Extraction("unknown extraction source".to_string()))?;
        info!("Extracted query via {:?}", source);

        let normalized = normalize_detailed(&raw_query, &context.database_name);
        info!("Normalized {} table reference(s)", normalized.rewrites.len());

        Ok(GeneratedQuery {
            query: normalized.query,
            raw_query,
            thought,
            source,
        })
    }
}
