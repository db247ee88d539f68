//! Command-line access to a SQL Server feature table.
//!
//! Runs provider operations outside a host framework and prints GeoJSON to
//! stdout. Logs go to stderr.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mssql_feature_provider::{
    FeatureProvider, MssqlProvider, ProviderConfig, QueryParameters, ResultType, SortSpec,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mssql-features", version, about)]
struct Cli {
    /// JSON provider definition; the MSSQL_* environment is used without it
    #[arg(long, env = "MSSQL_PROVIDER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the table's fields
    Fields,

    /// Query features
    Query {
        /// Features to skip
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Maximum features to return
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Only count matching features
        #[arg(long)]
        hits: bool,

        /// minx,miny,maxx,maxy in the table's SRID
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        bbox: Vec<f64>,

        /// Attribute filter, repeatable
        #[arg(long = "filter", value_name = "NAME=VALUE", value_parser = parse_filter)]
        filters: Vec<(String, String)>,

        /// Sort key, `-NAME` for descending, repeatable
        #[arg(long = "sort", value_name = "[-]NAME", allow_hyphen_values = true)]
        sort: Vec<SortSpec>,

        /// Property to emit, repeatable
        #[arg(long = "select", value_name = "NAME")]
        select: Vec<String>,

        /// Omit geometries
        #[arg(long)]
        skip_geometry: bool,
    },

    /// Fetch one feature by id
    Get { id: String },
}

fn parse_filter(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{}'", s)),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<ProviderConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let definition: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("{} is not valid JSON", path.display()))?;
            ProviderConfig::from_definition(definition)?
        }
        None => ProviderConfig::from_env()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let provider = MssqlProvider::new(config)?;

    let output = match cli.command {
        Command::Fields => serde_json::to_value(provider.get_fields().await?)?,
        Command::Query {
            offset,
            limit,
            hits,
            bbox,
            filters,
            sort,
            select,
            skip_geometry,
        } => {
            if !bbox.is_empty() && bbox.len() != 4 {
                bail!("--bbox needs exactly 4 values");
            }
            let params = QueryParameters {
                startindex: offset,
                limit,
                result_type: if hits {
                    ResultType::Hits
                } else {
                    ResultType::Results
                },
                bbox,
                properties: filters,
                sortby: sort,
                select_properties: select,
                skip_geometry,
                ..Default::default()
            };
            serde_json::to_value(provider.query(&params).await?)?
        }
        Command::Get { id } => serde_json::to_value(provider.get(&id).await?)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Initialize tracing subscriber with stderr output.
///
/// Logs MUST go to stderr because stdout carries the GeoJSON output.
fn init_logging() {
    let filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("warn,mssql_feature_provider=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
