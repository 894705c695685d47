// docgate - Main Entry Point
//
// Command line client for the rate-limited document service:
// - CRUD on single documents
// - Collection queries and copies
// - Live snapshot watching
// - Inspection of the configured limits

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docgate::config::{Config, StoreBackend};
use docgate::rate_limit::{Category, RateLimiter};
use docgate::store::{
    Direction, Document, DocumentStore, Fields, Filter, FilterOp, MemoryStore, Patch, Query,
    RestStore,
};
use docgate::{logging, metrics, DocumentService};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, info};

/// docgate: rate-limited document database client
#[derive(Parser, Debug)]
#[command(name = "docgate")]
#[command(version)]
#[command(about = "Rate-limited façade over a document database", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to ~/.config/docgate/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured store backend (memory, rest)
    #[arg(long, global = true)]
    backend: Option<StoreBackend>,

    /// Print Prometheus metrics to stderr after the command finishes
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a document as JSON (`null` if it does not exist)
    Get {
        /// Document path, e.g. users/42
        path: String,
    },
    /// Create or overwrite a document
    Set {
        path: String,
        /// Document data as a JSON object
        data: String,
        /// Keep fields that are not part of DATA
        #[arg(long)]
        merge: bool,
    },
    /// Update fields of an existing document
    Update {
        path: String,
        /// Fields to set, as a JSON object (dotted keys address nested fields)
        #[arg(default_value = "{}")]
        data: String,
        /// Field to delete (repeatable)
        #[arg(long = "delete", value_name = "FIELD")]
        delete: Vec<String>,
        /// Field to set to the store's write time (repeatable)
        #[arg(long = "server-timestamp", value_name = "FIELD")]
        server_timestamp: Vec<String>,
    },
    /// Delete a document
    Delete { path: String },
    /// Add a document with a generated id and print the id
    Add {
        /// Collection path, e.g. users
        collection: String,
        /// Document data as a JSON object
        data: String,
    },
    /// Query a collection
    Query {
        collection: String,
        /// Filter as "FIELD OP VALUE", e.g. "age >= 18" (repeatable)
        #[arg(long = "where", value_name = "FILTER")]
        filters: Vec<String>,
        /// Sort field, "FIELD" or "FIELD:desc" (repeatable)
        #[arg(long = "order-by", value_name = "FIELD")]
        order_by: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        offset: Option<usize>,
    },
    /// Copy all documents of a collection, keeping their ids
    Copy { source: String, target: String },
    /// Print snapshots of a document or collection as they change
    Watch {
        /// Document or collection path
        path: String,
        /// Stop after this many snapshots
        #[arg(long)]
        count: Option<usize>,
    },
    /// Show the configured rate limits
    Limits,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {:?}", path);
            }
            Config::load_from_path(path)?
        }
        None => Config::load()?,
    };
    if let Some(backend) = args.backend {
        config.store.backend = backend;
        config.validate()?;
    }

    logging::init(&config.logging, args.verbose)?;
    metrics::init().context("Failed to register metrics")?;
    debug!("docgate v{} starting", env!("CARGO_PKG_VERSION"));

    let limiter = RateLimiter::new(config.rate_limit.clone());
    match config.store.backend {
        StoreBackend::Memory => {
            let service = DocumentService::new(MemoryStore::new(), limiter)
                .with_max_query_results(config.query.max_results);
            run(&service, args.command).await?;
        }
        StoreBackend::Rest => {
            let store = RestStore::new(config.store.rest_config()?)
                .context("Failed to create REST store")?;
            info!(project = %store.config().project_id, "Using REST store");
            let service = DocumentService::new(store, limiter)
                .with_max_query_results(config.query.max_results);
            run(&service, args.command).await?;
        }
    }

    if args.metrics {
        eprint!("{}", metrics::gather_metrics()?);
    }

    Ok(())
}

async fn run<S: DocumentStore>(service: &DocumentService<S>, command: Commands) -> Result<()> {
    match command {
        Commands::Get { path } => {
            let doc = service.get_document(&path).await?;
            print_json(&doc.as_ref().map(Document::with_id).unwrap_or(Value::Null))?;
        }
        Commands::Set { path, data, merge } => {
            service
                .set_document(&path, parse_object(&data)?, merge)
                .await?;
            info!(path = %path, "Document written");
        }
        Commands::Update {
            path,
            data,
            delete,
            server_timestamp,
        } => {
            let mut patch = Patch::from(parse_object(&data)?);
            for field in delete {
                patch = patch.delete(field);
            }
            for field in server_timestamp {
                patch = patch.server_timestamp(field);
            }
            if patch.is_empty() {
                anyhow::bail!("Nothing to update");
            }
            service.update_document(&path, patch).await?;
            info!(path = %path, "Document updated");
        }
        Commands::Delete { path } => {
            service.delete_document(&path).await?;
            info!(path = %path, "Document deleted");
        }
        Commands::Add { collection, data } => {
            let id = service
                .add_document(&collection, parse_object(&data)?)
                .await?;
            println!("{}", id);
        }
        Commands::Query {
            collection,
            filters,
            order_by,
            limit,
            offset,
        } => {
            let mut query = Query::new(collection);
            for filter in &filters {
                query.filters.push(parse_filter(filter)?);
            }
            for order in &order_by {
                let (field, direction) = parse_order(order)?;
                query = query.order_by(field, direction);
            }
            query.limit = limit;
            query.offset = offset;

            let docs = service.execute_query(query).await?;
            print_json(&Value::Array(docs.iter().map(Document::with_id).collect()))?;
        }
        Commands::Copy { source, target } => {
            let copied = service.copy_collection(&source, &target).await?;
            println!("{}", copied);
        }
        Commands::Watch { path, count } => watch(service, &path, count).await?,
        Commands::Limits => print_limits(service.limiter(), service.max_query_results()),
    }
    Ok(())
}

async fn watch<S: DocumentStore>(
    service: &DocumentService<S>,
    path: &str,
    count: Option<usize>,
) -> Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Value>();

    let subscription = if path.split('/').count() % 2 == 1 {
        service.subscribe_collection(path, move |docs| {
            let _ = tx.send(Value::Array(docs.iter().map(Document::with_id).collect()));
        })?
    } else {
        service.subscribe_document(path, move |doc| {
            let _ = tx.send(doc.as_ref().map(Document::with_id).unwrap_or(Value::Null));
        })?
    };

    let mut seen = 0;
    loop {
        tokio::select! {
            snapshot = rx.recv() => {
                let Some(snapshot) = snapshot else { break };
                print_json(&snapshot)?;
                seen += 1;
                if count.is_some_and(|count| seen >= count) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    subscription.unsubscribe().await;
    Ok(())
}

fn print_limits(limiter: &RateLimiter, max_query_results: usize) {
    let config = limiter.config();
    println!("enabled: {}", config.enabled);
    println!("window_ms: {}", config.window_ms);
    println!("unkeyed: {:?}", config.unkeyed);
    println!("max_query_results: {}", max_query_results);
    for category in Category::ALL {
        println!("{:<16} {}", category, config.limit_for(category));
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_object(data: &str) -> Result<Fields> {
    let value: Value =
        serde_json::from_str(data).with_context(|| format!("Invalid JSON: {}", data))?;
    match value {
        Value::Object(fields) => Ok(fields),
        other => anyhow::bail!("Document data must be a JSON object, got: {}", other),
    }
}

// "age >= 18", "tags array-contains \"x\"", "name == ada"
fn parse_filter(filter: &str) -> Result<Filter> {
    let mut parts = filter.trim().splitn(3, char::is_whitespace);
    let (Some(field), Some(op), Some(raw)) = (parts.next(), parts.next(), parts.next()) else {
        anyhow::bail!("Filter must look like \"FIELD OP VALUE\": {}", filter);
    };
    let op = op.parse::<FilterOp>().map_err(|e| anyhow::anyhow!(e))?;
    let raw = raw.trim();
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok(Filter {
        field: field.to_string(),
        op,
        value,
    })
}

fn parse_order(order: &str) -> Result<(String, Direction)> {
    let (field, direction) = match order.rsplit_once(':') {
        Some((field, "desc")) => (field, Direction::Descending),
        Some((field, "asc")) => (field, Direction::Ascending),
        Some((_, other)) => anyhow::bail!("Unknown sort direction: {}", other),
        None => (order, Direction::Ascending),
    };
    Ok((field.to_string(), direction))
}
