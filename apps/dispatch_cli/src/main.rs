use std::{
    io::Read,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dispatch::{Dispatcher, ExecutionContext, OptionLayer, Params};
use serde_json::{Map, Value};
use shared::protocol::{BulkRequest, CommandOutcome};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod greetings;

use config::{load_settings, Settings};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "dispatcher.toml")]
    config: PathBuf,
    /// Role placed in the caller context.
    #[arg(long)]
    role: Option<String>,
    /// Caller context as a JSON object; `--role` is merged into it.
    #[arg(long)]
    context: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one command.
    Exec {
        command: String,
        /// Parameters as a JSON object.
        #[arg(long)]
        params: Option<String>,
    },
    /// Run a JSON bulk request from a file, or stdin when no file is given.
    Bulk {
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = load_settings(&cli.config)?;
    let dispatcher = build_dispatcher(&settings);
    let ctx = caller_context(cli.role.as_deref(), cli.context.as_deref())?;
    info!(config = %cli.config.display(), "dispatcher ready");

    match cli.command {
        Command::Exec { command, params } => {
            let params = parse_object(params.as_deref(), "--params")?;
            let result = dispatcher
                .execute(&ctx, &command, params, OptionLayer::default())
                .await;
            print_json(&dispatcher.outcome(result))?;
        }
        Command::Bulk { file } => {
            let request = read_bulk_request(file.as_deref())?;
            let outcomes = run_bulk(&dispatcher, &ctx, request).await?;
            print_json(&outcomes)?;
        }
    }

    Ok(())
}

fn build_dispatcher(settings: &Settings) -> Dispatcher {
    let mut dispatcher = Dispatcher::with_options(settings.option_layer());
    dispatcher.add_named_group(greetings::hello_group());
    for (name, target) in &settings.aliases {
        dispatcher.add_alias(name.clone(), target.clone());
    }
    dispatcher
}

fn caller_context(role: Option<&str>, raw: Option<&str>) -> Result<ExecutionContext> {
    let mut caller = parse_object(raw, "--context")?;
    if let Some(role) = role {
        caller.insert("role".into(), Value::String(role.to_string()));
    }
    Ok(ExecutionContext::new(caller))
}

fn parse_object(raw: Option<&str>, what: &str) -> Result<Params> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw).with_context(|| format!("{what} is not valid JSON"))? {
        Value::Object(map) => Ok(map),
        _ => bail!("{what} must be a JSON object"),
    }
}

fn read_bulk_request(file: Option<&Path>) -> Result<BulkRequest> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read bulk request '{}'", path.display()))?,
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("failed to read bulk request from stdin")?;
            raw
        }
    };
    serde_json::from_str(&raw).context("invalid bulk request")
}

async fn run_bulk(
    dispatcher: &Dispatcher,
    ctx: &ExecutionContext,
    request: BulkRequest,
) -> Result<Vec<CommandOutcome>> {
    let batch = OptionLayer::from_map(request.options).context("invalid batch options")?;
    let results = dispatcher
        .execute_requests(ctx, request.commands, batch)
        .await;
    Ok(dispatcher.outcomes(results))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
