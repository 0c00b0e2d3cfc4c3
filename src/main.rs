use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sql_bridge::prompt::{PromptBuilder, RuleSet, RULES_V1_QUOTED, RULES_V2_FENCED};
use sql_bridge::schema::SchemaColumnRow;
use sql_bridge::schema_formatter::{SchemaFormatter, NO_EXAMPLES_TEXT};
use sql_bridge::{extract, normalize, BridgeConfig, DatabaseName, QueryPipeline, SchemaDescription};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sql-bridge")]
#[command(about = "Turn natural-language questions into fully qualified SQL Server queries")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the formatted schema block and generated examples
    Schema {
        #[command(flatten)]
        schema: SchemaArgs,

        /// Rule set whose output convention the examples follow
        #[arg(long, value_enum, default_value_t = Rules::V2)]
        rules: Rules,
    },

    /// Ask the model for a query
    Generate {
        /// The question in natural language
        question: String,

        #[command(flatten)]
        schema: SchemaArgs,

        #[arg(long, value_enum, default_value_t = Rules::V2)]
        rules: Rules,

        /// File with example queries to use instead of generated ones
        #[arg(long)]
        examples: Option<PathBuf>,

        /// Print the model's chain-of-thought to stderr
        #[arg(long)]
        show_thought: bool,
    },

    /// Extract a query from a model response (file or stdin)
    Extract {
        /// Response file; stdin when omitted
        file: Option<PathBuf>,
    },

    /// Fully qualify the table references of a query
    Normalize {
        query: String,

        #[arg(short, long)]
        database: String,
    },
}

#[derive(clap::Args)]
struct SchemaArgs {
    /// Schema description JSON (or catalog rows with --rows)
    #[arg(short, long)]
    schema: PathBuf,

    /// Target database name
    #[arg(short, long)]
    database: String,

    /// Treat the schema file as a flat array of catalog rows
    #[arg(long)]
    rows: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Rules {
    V1,
    V2,
}

impl Rules {
    fn rule_set(self) -> RuleSet {
        match self {
            Rules::V1 => RULES_V1_QUOTED,
            Rules::V2 => RULES_V2_FENCED,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Schema { schema, rules } => {
            let (database, description) = load_schema(&schema)?;
            let formatted = SchemaFormatter::format(&description);
            println!("{}", formatted.schema_text);
            let examples = PromptBuilder::new(rules.rule_set()).render_examples(&formatted.examples);
            if examples.is_empty() {
                println!("{}", NO_EXAMPLES_TEXT);
            } else {
                println!("{}", examples.trim_end());
            }
            info!("Formatted {} table(s) for {}", description.tables.len(), database);
        }

        Command::Generate {
            question,
            schema,
            rules,
            examples,
            show_thought,
        } => {
            let config = BridgeConfig::from_env()?;
            let (database, description) = load_schema(&schema)?;
            let pipeline = QueryPipeline::from_config(&config)?.with_rules(rules.rule_set());

            let generated = match examples {
                Some(path) => {
                    let examples_text = read_file(&path)?;
                    let schema_text = SchemaFormatter::schema_block(&description);
                    pipeline
                        .generate_from_text(&question, &schema_text, &examples_text, &database)
                        .await?
                }
                None => pipeline.generate(&question, &description, &database).await?,
            };

            if show_thought {
                if let Some(thought) = &generated.thought {
                    eprintln!("{}", thought);
                }
            }
            println!("{}", generated.query);
        }

        Command::Extract { file } => {
            let response = match file {
                Some(path) => read_file(&path)?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("Failed to read model response from stdin")?;
                    buf
                }
            };
            let result = extract(&response);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Command::Normalize { query, database } => {
            let database = DatabaseName::new(database)?;
            println!("{}", normalize(&query, &database));
        }
    }

    Ok(())
}

fn load_schema(args: &SchemaArgs) -> Result<(DatabaseName, SchemaDescription)> {
    let database = DatabaseName::new(args.database.clone())?;
    let raw = read_file(&args.schema)?;

    let description = if args.rows {
        let rows: Vec<SchemaColumnRow> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid catalog rows in {}", args.schema.display()))?;
        SchemaDescription::from_metadata_rows(&database, rows)
    } else {
        let description: SchemaDescription = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid schema description in {}", args.schema.display()))?;
        description.qualified_for(&database)
    };

    Ok((database, description))
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
