mod config;
mod pg;

use anyhow::{bail, Context};
use anyrow_core::error::PartialFetch;
use anyrow_core::types::{object_to_json, Object, ParamValue};
use anyrow_protocol::messages::RowSet;
use anyrow_sql::{FetchEngine, KeySpec};
use clap::{Parser, Subcommand};
use config::{Config, LoggingConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "anyrow", about = "Fetch rows of any table as JSON objects")]
struct Args {
    /// Path to the toml configuration file.
    #[arg(long, default_value = "anyrow.toml")]
    config: String,

    /// Print fetch counters in Prometheus text format to stderr when done.
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List user schemas.
    Schemas,
    /// List base tables of a schema.
    Tables {
        #[arg(long)]
        schema: Option<String>,
    },
    /// Show the columns of a table, in catalog order.
    Columns { table: String },
    /// Fetch rows matching a free-form WHERE predicate.
    Filter {
        table: String,
        #[arg(long = "where", default_value = "")]
        where_text: String,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Fetch rows by key values.
    Keys {
        table: String,
        /// Key column for a `column IN (...)` lookup.
        #[arg(long, conflicts_with = "pairs")]
        column: Option<String>,
        #[arg(long = "value", requires = "column")]
        values: Vec<String>,
        /// `column=value` pairs that must all match.
        #[arg(long = "pair")]
        pairs: Vec<String>,
        /// Print the typed row set instead of generic objects.
        #[arg(long)]
        row_set: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_path(&args.config)?;
    init_logging(&config.logging)?;
    let metrics = if args.metrics {
        Some(PrometheusBuilder::new().install_recorder()?)
    } else {
        None
    };

    let conn = pg::connect(&config.database)
        .await
        .context("connecting to database")?;
    let engine = FetchEngine::new(config.engine.clone());
    let output = run(&engine, &conn, &config, args.command).await?;
    println!("{output}");

    if let Some(handle) = metrics {
        eprint!("{}", handle.render());
    }
    Ok(())
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn run(
    engine: &FetchEngine,
    conn: &pg::PgQuerier,
    config: &Config,
    command: Command,
) -> anyhow::Result<String> {
    let output = match command {
        Command::Schemas => serde_json::to_string_pretty(&engine.list_schemas(conn).await?)?,
        Command::Tables { schema } => {
            let schema = schema.unwrap_or_else(|| config.engine.default_schema.clone());
            serde_json::to_string_pretty(&engine.list_tables(conn, &schema).await?)?
        }
        Command::Columns { table } => {
            serde_json::to_string_pretty(&engine.resolve_columns(conn, &table).await?)?
        }
        Command::Filter {
            table,
            where_text,
            limit,
        } => {
            let objects = engine
                .filter_objects(conn, &table, &table, &where_text, limit)
                .await
                .map_err(partial_objects)?;
            info!(table = %table, rows = objects.len(), "fetched");
            render_objects(&objects)?
        }
        Command::Keys {
            table,
            column,
            values,
            pairs,
            row_set,
        } => {
            let keys = key_spec(column, &values, &pairs)?;
            if row_set {
                let set = engine
                    .fetch_row_set(conn, &table, &table, keys)
                    .await
                    .map_err(|p| {
                        let rows = p.collected.len();
                        partial_output(p, rows, |set: &RowSet| Ok(set.to_json_string()))
                    })?;
                info!(table = %table, rows = set.len(), "fetched");
                set.to_json_string()
            } else {
                let objects = engine
                    .fetch_objects(conn, &table, &table, keys)
                    .await
                    .map_err(partial_objects)?;
                info!(table = %table, rows = objects.len(), "fetched");
                render_objects(&objects)?
            }
        }
    };
    Ok(output)
}

fn render_objects(objects: &[Object]) -> anyhow::Result<String> {
    let rows: Vec<serde_json::Value> = objects.iter().map(object_to_json).collect();
    Ok(serde_json::to_string_pretty(&rows)?)
}

fn partial_objects(partial: PartialFetch<Vec<Object>>) -> anyhow::Error {
    let rows = partial.collected.len();
    partial_output(partial, rows, |objects| render_objects(objects))
}

/// Prints whatever was fetched before the failure, then hands back the error.
fn partial_output<T>(
    partial: PartialFetch<T>,
    rows: usize,
    render: impl FnOnce(&T) -> anyhow::Result<String>,
) -> anyhow::Error {
    let (collected, error) = partial.into_parts();
    if rows > 0 {
        match render(&collected) {
            Ok(text) => {
                warn!(rows, "fetch failed part way, printing the rows read so far");
                println!("{text}");
            }
            Err(err) => return err,
        }
    }
    error.into()
}

fn key_spec(
    column: Option<String>,
    values: &[String],
    pairs: &[String],
) -> anyhow::Result<KeySpec> {
    match column {
        Some(column) if pairs.is_empty() => Ok(KeySpec::column_values(
            column,
            values.iter().map(|v| parse_param(v)),
        )),
        None if !pairs.is_empty() => {
            let pairs = pairs
                .iter()
                .map(|p| parse_pair(p))
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(KeySpec::pairs(pairs))
        }
        _ => bail!("pass either --column with --value, or one or more --pair column=value"),
    }
}

fn parse_pair(text: &str) -> anyhow::Result<(String, ParamValue)> {
    let Some((column, value)) = text.split_once('=') else {
        bail!("expected column=value, got {text:?}");
    };
    Ok((column.trim().to_string(), parse_param(value.trim())))
}

/// Guesses the type of a command line value. Single quotes force text.
fn parse_param(text: &str) -> ParamValue {
    if let Some(inner) = text
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
    {
        return ParamValue::Text(inner.to_string());
    }
    if text.eq_ignore_ascii_case("null") {
        return ParamValue::Null;
    }
    if let Ok(v) = text.parse::<i64>() {
        return ParamValue::Int64(v);
    }
    if let Ok(v) = text.parse::<bool>() {
        return ParamValue::Bool(v);
    }
    if let Some(v) = text.parse::<f64>().ok().filter(|v| v.is_finite()) {
        return ParamValue::Float64(v);
    }
    if let Ok(v) = Uuid::parse_str(text) {
        return ParamValue::Uuid(v);
    }
    ParamValue::Text(text.to_string())
}
