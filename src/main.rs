//! dbquery CLI Entry Point
//!
//! Subcommands:
//! - `query` - Run one query and print a JSON envelope
//! - `serve` - Line-delimited JSON request loop over stdio
//! - `schema` - Print the JSON Schemas of the `serve` payloads
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing::error;
use tracing_subscriber::EnvFilter;

use dbquery::invoke::{self, Reply};
use dbquery::{
    DbQueryError, ErrorEnvelope, QueryResponse, QueryService, ServiceSettings,
    SuccessEnvelope,
};

/// Run SQL against RDS with IAM auth and password fallback
#[derive(Parser)]
#[command(name = "dbquery")]
#[command(about = "Run SQL against RDS databases with IAM token authentication")]
#[command(version)]
struct Cli {
    /// Settings file (default: ~/.config/dbquery/settings.json when present)
    #[arg(long, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Log format written to stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query: `dbquery query [DATABASE] <QUERY>`; prompts when no query is given
    Query {
        #[arg(num_args = 0..=2, value_name = "ARGS")]
        args: Vec<String>,
    },

    /// Read JSON requests from stdin, one per line, and answer each on stdout
    Serve,

    /// Print JSON Schemas for the serve request and reply payloads
    Schema,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "dbquery failed");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Query { args } => run_query(cli.settings.as_deref(), args).await,
        Commands::Serve => run_serve(cli.settings.as_deref()).await,
        Commands::Schema => {
            println!("{}", serde_json::to_string_pretty(&invoke::payload_schemas()?)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_query(settings_path: Option<&Path>, args: Vec<String>) -> Result<ExitCode> {
    let settings = match ServiceSettings::load(settings_path) {
        Ok(settings) => settings,
        Err(e) => return print_error("", &e),
    };
    let engine = settings.engine.clone();

    let (database, query) = match split_query_args(args) {
        Ok(Some(parsed)) => parsed,
        Ok(None) => match prompt_query() {
            Ok(query) => (None, query),
            Err(e) => return print_error(&engine, &e),
        },
        Err(e) => return print_error(&engine, &e),
    };

    let service = QueryService::from_settings(settings);
    let start = Instant::now();

    match service.execute(&query, database.as_deref()).await {
        Ok(result) => {
            let execution_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
            let envelope =
                SuccessEnvelope::new(engine, QueryResponse { rows: result.rows }, execution_ms);
            println!("{}", serde_json::to_string(&envelope)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => print_error(&engine, &e),
    }
}

async fn run_serve(settings_path: Option<&Path>) -> Result<ExitCode> {
    let settings = match ServiceSettings::load(settings_path) {
        Ok(settings) => settings,
        Err(e) => {
            println!("{}", serde_json::to_string(&Reply::from(&e))?);
            return Ok(ExitCode::FAILURE);
        }
    };

    let service = QueryService::from_settings(settings);
    invoke::serve(&service).await?;
    Ok(ExitCode::SUCCESS)
}

/// `[QUERY]` or `[DATABASE, QUERY]`; `None` when the query must be prompted for
fn split_query_args(args: Vec<String>) -> dbquery::Result<Option<(Option<String>, String)>> {
    let mut args = args.into_iter();
    let parsed = match (args.next(), args.next()) {
        (None, _) => None,
        (Some(query), None) => Some((None, query)),
        (Some(database), Some(query)) => Some((Some(database), query)),
    };

    match parsed {
        Some((_, query)) if query.trim().is_empty() => {
            Err(DbQueryError::invalid_input("query must not be empty"))
        }
        other => Ok(other),
    }
}

fn prompt_query() -> dbquery::Result<String> {
    let query: String = dialoguer::Input::new()
        .with_prompt("Query")
        .interact_text()
        .map_err(|e| DbQueryError::invalid_input(format!("could not read query: {e}")))?;

    if query.trim().is_empty() {
        return Err(DbQueryError::invalid_input("query must not be empty"));
    }
    Ok(query)
}

fn print_error(engine: &str, err: &DbQueryError) -> Result<ExitCode> {
    let envelope = ErrorEnvelope::new(engine, err);
    println!("{}", serde_json::to_string(&envelope)?);
    Ok(ExitCode::FAILURE)
}
