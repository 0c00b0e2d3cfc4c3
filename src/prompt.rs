//! Prompt Builder
//!
//! Assembles the generation prompt from the formatted schema, example queries,
//! a versioned rule set and the user's question. Rule wording is data: a new
//! rule set is a new constant, the assembly code does not change.

use crate::schema::DatabaseName;
use crate::schema_formatter::{ExampleQuery, FormattedSchema, SCHEMA_HEADER};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref LIMIT_KEYWORD: Regex = Regex::new(r"\bLIMIT\b").unwrap();
}

const ROLE_PREAMBLE: &str =
    "You are an expert in SQL Server. Your task is to generate a valid SQL Server query for the given question.";

const EXAMPLES_HEADER: &str = "Below are some general examples of questions:";

const LIMIT_NOTE: &str = "-- LIMIT (Note: Use TOP instead for SQL Server)";

/// How the model is asked to wrap its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputConvention {
    /// A fenced code block tagged `sql`.
    FencedBlock,
    /// `Your SQL Query will be like "<query>"`.
    QuotedSentence,
}

impl OutputConvention {
    pub fn instruction(&self) -> &'static str {
        match self {
            OutputConvention::FencedBlock => {
                "Your output MUST be a single SQL query enclosed in a code block with SQL syntax highlighting (```sql ... ```). Do not add explanations outside the code block."
            }
            OutputConvention::QuotedSentence => {
                "Your output MUST follow the pattern: Your SQL Query will be like \"SQL QUERY HERE\". Do not include triple backticks, explanations, or any other text."
            }
        }
    }

    /// Render one example answer in this convention.
    pub fn render_answer(&self, sql: &str) -> String {
        match self {
            OutputConvention::FencedBlock => format!("```sql\n{}\n```", sql),
            OutputConvention::QuotedSentence => format!("Your SQL Query will be like \"{};\"", sql),
        }
    }
}

/// A versioned, ordered list of output rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleSet {
    pub version: &'static str,
    pub convention: OutputConvention,
    pub rules: &'static [&'static str],
}

const CORE_RULES: &[&str] = &[
    "Return exactly ONE SQL Server query. No additional explanations, comments or alternative queries.",
    "Use SQL Server row limiting (SELECT TOP n ... or OFFSET ... FETCH NEXT) for row limitations; never use LIMIT.",
    "CRITICAL: ALL table references MUST follow the pattern [DATABASE_NAME].[SCHEMA_NAME].[TABLE_NAME], everywhere in the query, with no exceptions.",
    "Take SCHEMA_NAME and TABLE_NAME exactly from the table definitions in the schema above; never assume them.",
    "Always use square brackets around database, schema and table names: [DATABASE_NAME].[SCHEMA_NAME].[TABLE_NAME].",
    "Do not include ORDER BY clauses in subqueries, common table expressions, derived tables, inline functions or views unless accompanied by TOP, OFFSET or FOR XML.",
    "When an aggregate function (COUNT, SUM, AVG, MIN, MAX) is requested per customer, product, category or any other group, include a corresponding GROUP BY clause.",
    "If the query involves more than one table, use table aliases.",
    "Use only tables and columns that exist in the provided schema; never invent table or column names.",
    "When using window functions, put PARTITION BY and ORDER BY inside the OVER() clause using SQL Server syntax.",
    "When filtering by a specific month, use MONTH(date_column) = MM rather than comparing against a 'YYYY-MM' string.",
    "Answer the question as directly as possible, selecting only what is asked for.",
];

/// Current rule set: fenced `sql` block output.
pub const RULES_V2_FENCED: RuleSet = RuleSet {
    version: "v2",
    convention: OutputConvention::FencedBlock,
    rules: CORE_RULES,
};

/// Earlier rule set: quoted-sentence output.
pub const RULES_V1_QUOTED: RuleSet = RuleSet {
    version: "v1",
    convention: OutputConvention::QuotedSentence,
    rules: CORE_RULES,
};

impl Default for RuleSet {
    fn default() -> Self {
        RULES_V2_FENCED
    }
}

impl RuleSet {
    /// Enumerated rule list, convention instruction last.
    pub fn render(&self) -> String {
        let mut lines: Vec<String> = self
            .rules
            .iter()
            .enumerate()
            .map(|(i, rule)| format!("{}. {}", i + 1, rule))
            .collect();
        lines.push(format!("{}. {}", self.rules.len() + 1, self.convention.instruction()));
        lines.join("\n")
    }
}

/// Everything one generation prompt is made of. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    pub formatted_schema_text: String,
    pub example_queries_text: String,
    pub output_rules_text: String,
    pub database_name: DatabaseName,
    pub user_question: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PromptBuilder {
    rules: RuleSet,
}

impl PromptBuilder {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn context(
        &self,
        question: &str,
        formatted: &FormattedSchema,
        database: &DatabaseName,
    ) -> PromptContext {
        PromptContext {
            formatted_schema_text: formatted.schema_text.clone(),
            example_queries_text: self.render_examples(&formatted.examples),
            output_rules_text: self.rules.render(),
            database_name: database.clone(),
            user_question: question.trim().to_string(),
        }
    }

    /// Context for a caller that supplies its own schema and example text.
    /// `LIMIT` in the supplied examples is neutralised.
    pub fn context_from_text(
        &self,
        question: &str,
        schema_text: &str,
        examples_text: &str,
        database: &DatabaseName,
    ) -> PromptContext {
        PromptContext {
            formatted_schema_text: schema_text.to_string(),
            example_queries_text: scrub_limit(examples_text),
            output_rules_text: self.rules.render(),
            database_name: database.clone(),
            user_question: question.trim().to_string(),
        }
    }

    pub fn render_examples(&self, examples: &[ExampleQuery]) -> String {
        if examples.is_empty() {
            return String::new();
        }
        let mut out = format!("{}\n\n", EXAMPLES_HEADER);
        for (i, example) in examples.iter().enumerate() {
            out.push_str(&format!(
                "{}. {}\n{}\n\n",
                i + 1,
                example.question,
                self.rules.convention.render_answer(&example.sql)
            ));
        }
        out
    }

    pub fn build(&self, context: &PromptContext) -> String {
        let schema_body = context
            .formatted_schema_text
            .replace(SCHEMA_HEADER, "")
            .trim()
            .to_string();
        let schema_section = if schema_body.is_empty() {
            "No schema information was provided.".to_string()
        } else {
            format!("Below is the database schema\n{}", schema_body)
        };

        let examples_section = if context.example_queries_text.trim().is_empty() {
            format!("No examples available for database {}", context.database_name)
        } else {
            format!(
                "Use the following query examples as a guide:\n{}",
                context.example_queries_text.trim_end()
            )
        };

        format!(
            "{preamble}\n\n{schema}\n\n{examples}\n\nHere are the output rules:\n{rules}\n\nIMPORTANT: {convention}\nYou MUST format all table references with full three-part names [DATABASE_NAME].[SCHEMA_NAME].[TABLE_NAME] where:\n- DATABASE_NAME is the current database name which is: {database}\n- SCHEMA_NAME is taken from the table definition in the schema above\n- TABLE_NAME exactly matches the schema above\n\nUser Question: {question}\n",
            preamble = ROLE_PREAMBLE,
            schema = schema_section,
            examples = examples_section,
            rules = context.output_rules_text,
            convention = self.rules.convention.instruction(),
            database = context.database_name,
            question = context.user_question,
        )
    }
}

/// Replace `LIMIT` in caller-supplied examples with a SQL Server note.
pub fn scrub_limit(text: &str) -> String {
    LIMIT_KEYWORD.replace_all(text, LIMIT_NOTE).into_owned()
}
