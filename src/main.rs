//! `claimsql` command line.
//!
//! ```text
//! claimsql [--config <file>] run <rules.json>   process rules, one JSON result per line
//! claimsql [--config <file>] validate <sql>     print the validation diagnostic
//! claimsql [--config <file>] schema             print the DDL for the configured schema
//! claimsql [--config <file>] serve              start the HTTP interface
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use claimsql::config::Settings;
use claimsql::engine::RuleEngine;
use claimsql::error::{Error, Result};
use claimsql::interface::RuleInterface;
use claimsql::rule::RuleDescription;
use claimsql::schema::{self, SchemaDescriptor};
use claimsql::server;
use claimsql::store::SqliteClaimsStore;
use claimsql::synth::TemplateSynthesizer;

enum Command {
    Run(String),
    Validate(String),
    Schema,
    Serve,
}

fn usage() -> ExitCode {
    eprintln!("usage: claimsql [--config <file>] (run <rules.json> | validate <sql> | schema | serve)");
    ExitCode::from(2)
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Option<(Option<String>, Command)> {
    let mut config = None;
    let mut next = args.next()?;
    if next == "--config" {
        config = Some(args.next()?);
        next = args.next()?;
    }
    let command = match next.as_str() {
        "run" => Command::Run(args.next()?),
        "validate" => Command::Validate(args.next()?),
        "schema" => Command::Schema,
        "serve" => Command::Serve,
        _ => return None,
    };
    Some((config, command))
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_schema(settings: &Settings) -> Result<SchemaDescriptor> {
    let schema = match &settings.schema.definition {
        Some(path) => SchemaDescriptor::from_json_file(path)?,
        None => schema::describe()?,
    };
    Ok(schema)
}

fn build_interface(settings: &Settings, schema: Arc<SchemaDescriptor>) -> Result<RuleInterface> {
    let store = SqliteClaimsStore::open(&settings.store.path)?;
    store.provision(&schema)?;
    if settings.store.load_sample_data {
        store.load_sample_data()?;
    }
    let engine = RuleEngine::from_settings(settings, schema, Arc::new(TemplateSynthesizer::new()), Arc::new(store));
    Ok(RuleInterface::new(Arc::new(engine)).with_workers(settings.workers))
}

fn run(settings: &Settings, schema: Arc<SchemaDescriptor>, command: Command) -> Result<()> {
    match command {
        Command::Schema => {
            for statement in schema.create_statements() {
                println!("{statement};");
            }
        }
        Command::Validate(sql) => {
            let diagnostic = claimsql::validate::Validator::with_strictness(settings.correction.type_strictness)
                .validate(&sql, &schema);
            println!("{}", serde_json::to_string_pretty(&diagnostic)?);
        }
        Command::Run(path) => {
            let rules: Vec<RuleDescription> = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
            let interface = build_interface(settings, schema)?;
            info!(rules = rules.len(), file = %path, "processing rules");
            for result in interface.run_sync(&rules) {
                println!("{}", serde_json::to_string(&result)?);
            }
        }
        Command::Serve => {
            let interface = Arc::new(build_interface(settings, schema)?);
            let bind = settings.server.bind.clone();
            let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind(&bind).await?;
                info!(address = %bind, "listening");
                axum::serve(listener, server::router(interface)).await?;
                Ok::<_, Error>(())
            })?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let Some((config, command)) = parse_args(std::env::args().skip(1)) else {
        return usage();
    };
    let settings = match Settings::load(config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("claimsql: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&settings.log_level);
    let schema = match load_schema(&settings) {
        Ok(schema) => Arc::new(schema),
        Err(e) => {
            error!(error = %e, "schema could not be loaded");
            return ExitCode::FAILURE;
        }
    };
    match run(&settings, schema, command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "claimsql failed");
            ExitCode::FAILURE
        }
    }
}
