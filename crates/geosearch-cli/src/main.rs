//! Geosearch CLI - configuration-driven geospatial search

use clap::{Parser, Subcommand};
use geosearch_core::composer::{ComposedQuery, Dialect, QueryComposer};
use geosearch_core::config::Config;
use geosearch_core::engine::{SearchEngine, SearchResponse};
use geosearch_core::formatter::FormatterCatalog;
use geosearch_core::Error;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Parser)]
#[command(name = "geosearch")]
#[command(author, version, about = "Configuration-driven geospatial search", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to $GEOSEARCH_CONFIG or the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered search types
    Types,

    /// Search one or more types
    Search {
        /// Comma-separated search types
        #[arg(short, long, value_delimiter = ',', required = true)]
        types: Vec<String>,
        /// Free-text query
        query: String,
    },

    /// Print the statement a search would run, without connecting
    Explain {
        /// Comma-separated search types
        #[arg(short, long, value_delimiter = ',', required = true)]
        types: Vec<String>,
        /// Free-text query
        query: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Show config file path
    Path,
    /// Write the default configuration to the config path
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Get a configuration value
    Get { key: String },
    /// List all configuration values
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so search output can be piped
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("geosearch=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Types => cmd_types(cli.config.as_deref(), cli.format),
        Commands::Search { types, query } => {
            cmd_search(cli.config.as_deref(), &types, &query, cli.format, cli.quiet).await
        }
        Commands::Explain { types, query } => {
            cmd_explain(cli.config.as_deref(), &types, &query, cli.format)
        }
        Commands::Config { action } => cmd_config(cli.config.as_deref(), action, cli.quiet),
    };

    if let Err(err) = &result {
        if let Some(hint) = err.downcast_ref::<Error>().and_then(Error::suggestion) {
            eprintln!("Error: {:#}", err);
            eprintln!("  hint: {}", hint);
            std::process::exit(1);
        }
    }
    result
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn config_path(path: Option<&Path>) -> anyhow::Result<PathBuf> {
    match path {
        Some(path) => Ok(path.to_path_buf()),
        None => Config::config_path(),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

fn cmd_types(config_file: Option<&Path>, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(config_file)?;
    let types = config.registry(&FormatterCatalog::builtin())?.all();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&types)?),
        OutputFormat::Text => {
            for name in types {
                println!("{}", name);
            }
        }
    }
    Ok(())
}

async fn cmd_search(
    config_file: Option<&Path>,
    types: &[String],
    query: &str,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let config = load_config(config_file)?;
    debug!(database = %config.database.redacted_url(), "Connecting search engine");
    let engine = SearchEngine::from_config(&config).await?;
    let response = engine.search(types, query).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&*response.rows)?),
        OutputFormat::Text => print_rows(&response, quiet),
    }
    Ok(())
}

fn print_rows(response: &SearchResponse, quiet: bool) {
    if response.rows.is_empty() {
        if !quiet {
            println!("No results.");
        }
        return;
    }

    for row in response.rows.iter() {
        println!(
            "{}\t{}\t{}\t{:.4}, {:.4}",
            row.label, row.kind, row.id, row.lng, row.lat
        );
    }

    if !quiet {
        println!(
            "\n{} result(s) | Cache-Control: {}",
            response.rows.len(),
            response.cache.header_value()
        );
    }
}

fn cmd_explain(
    config_file: Option<&Path>,
    types: &[String],
    query: &str,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let config = load_config(config_file)?;
    if config.engine.reject_empty_query && query.trim().is_empty() {
        return Err(Error::EmptyQuery.into());
    }

    let registry = config.registry(&FormatterCatalog::builtin())?;
    let composer = QueryComposer::new(Dialect::from_url(&config.database.url)?);
    let composed = composer.compose(&registry, types, query)?;

    match format {
        OutputFormat::Json => println!("{}", explain_json(&composed, composer.dialect())),
        OutputFormat::Text => {
            println!("{}", composed.sql);
            for (index, param) in composed.params.iter().enumerate() {
                println!("  {} = {:?}", param_label(composer.dialect(), index + 1), param);
            }
        }
    }
    Ok(())
}

/// Label for the 1-based parameter `index` as the dialect numbers it
fn param_label(dialect: Dialect, index: usize) -> String {
    match dialect {
        Dialect::Postgres => format!("${}", index),
        Dialect::Sqlite => format!("?{}", index),
    }
}

fn explain_json(composed: &ComposedQuery, dialect: Dialect) -> serde_json::Value {
    serde_json::json!({
        "dialect": dialect.as_str(),
        "search_types": composed.search_types,
        "sql": composed.sql,
        "params": composed.params,
    })
}

fn cmd_config(config_file: Option<&Path>, action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_file)?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            let path = config_path(config_file)?;
            println!("{}", path.display());
        }
        ConfigAction::Init { force } => {
            let path = config_path(config_file)?;
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists: {} (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save_to(&path)?;
            if !quiet {
                println!("Wrote default configuration to {}", path.display());
            }
        }
        ConfigAction::Get { key } => {
            let config = load_config(config_file)?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::List => {
            let config = load_config(config_file)?;
            let items = config.list()?;
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
    }
    Ok(())
}
