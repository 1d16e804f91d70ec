use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use configuration::{init_tracing, load_settings};
use core_types::{format_date, format_datetime, AssetId};
use database::{InsertFrame, InsertMode, QueryFilter, Record, StoreCatalog, StoreInfo};
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use tracing::info;

/// The main entry point for the custom data tool.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(root) = cli.root {
        settings.storage.root = root;
    }
    // Keep the guard alive so file logs are flushed on exit.
    let _log_guard = init_tracing(&settings.logging).context("Failed to initialise logging")?;

    let catalog = StoreCatalog::new(&settings.storage.root);
    info!(root = %catalog.root().display(), "Using custom data root.");

    // Execute the appropriate command
    match cli.command {
        Commands::Create(args) => {
            let bar_size = args
                .bar_size
                .unwrap_or_else(|| settings.storage.default_bar_size.clone());
            handle_create(&catalog, args.code, args.columns, bar_size).await
        }
        Commands::List => handle_list(&catalog).await,
        Commands::Info { code } => handle_info(&catalog, &code).await,
        Commands::Drop { code } => {
            catalog
                .drop_store(&code)
                .await
                .with_context(|| format!("Failed to drop store '{}'", code))?;
            println!("Dropped store '{}'.", code);
            Ok(())
        }
        Commands::Insert(args) => handle_insert(&catalog, args).await,
        Commands::Query(args) => handle_query(&catalog, args).await,
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Manage custom per-asset time-series stores.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to ./custom-data.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the configured store root directory.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty store.
    Create(CreateArgs),
    /// List every store under the root.
    List,
    /// Show the schema and size of a store.
    Info { code: String },
    /// Delete a store.
    Drop { code: String },
    /// Write rows from a JSON records file.
    Insert(InsertArgs),
    /// Read rows from a store.
    Query(QueryArgs),
}

#[derive(Parser)]
struct CreateArgs {
    /// The store code (e.g., "fundamentals-daily").
    code: String,

    /// A column as NAME:DTYPE (e.g., "pe_ratio:float"). Repeat for more columns.
    #[arg(long = "column", short = 'c', required = true, value_parser = parse_column)]
    columns: Vec<(String, String)>,

    /// Bar size label recorded in the store metadata (e.g., "1d").
    #[arg(long)]
    bar_size: Option<String>,
}

#[derive(Parser)]
struct InsertArgs {
    code: String,

    /// A JSON file holding an array of objects with "date", "asset_id" and column fields.
    #[arg(long)]
    file: PathBuf,

    /// One of "replace", "append" or "update".
    #[arg(long, default_value = "replace")]
    mode: InsertMode,
}

#[derive(Parser)]
struct QueryArgs {
    code: String,

    /// The first date to include (format: YYYY-MM-DD).
    #[arg(long)]
    from: Option<NaiveDate>,

    /// The last date to include (format: YYYY-MM-DD).
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Restrict to these asset ids (comma separated or repeated).
    #[arg(long = "asset", value_delimiter = ',')]
    assets: Vec<AssetId>,

    /// Restrict to these columns (comma separated or repeated).
    #[arg(long = "column", value_delimiter = ',')]
    columns: Vec<String>,

    /// Add an inserted_at column to table output. JSON output always carries it.
    #[arg(long)]
    inserted_at: bool,

    /// Print JSON instead of a table.
    #[arg(long)]
    json: bool,
}

fn parse_column(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((name, dtype)) if !name.is_empty() && !dtype.is_empty() => {
            Ok((name.to_string(), dtype.to_string()))
        }
        _ => Err(format!("expected NAME:DTYPE, got '{}'", raw)),
    }
}

// ==============================================================================
// Command Logic
// ==============================================================================

async fn handle_create(
    catalog: &StoreCatalog,
    code: String,
    columns: Vec<(String, String)>,
    bar_size: String,
) -> anyhow::Result<()> {
    let path = catalog
        .create(&code, columns, &bar_size)
        .await
        .with_context(|| format!("Failed to create store '{}'", code))?;
    println!("Created store '{}' at {}", code, path.display());
    Ok(())
}

async fn handle_list(catalog: &StoreCatalog) -> anyhow::Result<()> {
    let stores = catalog.list().await.context("Failed to list stores")?;
    if stores.is_empty() {
        println!("No stores under {}", catalog.root().display());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Code", "Bar Size", "Columns", "Rows", "Size (bytes)", "Created"]);
    for store in &stores {
        table.add_row(vec![
            store.code.clone(),
            store.bar_size.clone(),
            store.columns.len().to_string(),
            store.row_count.to_string(),
            store.size_bytes.to_string(),
            store.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn handle_info(catalog: &StoreCatalog, code: &str) -> anyhow::Result<()> {
    let info = catalog
        .info(code)
        .await
        .with_context(|| format!("Failed to read store '{}'", code))?;
    print_info(&info);
    Ok(())
}

fn print_info(info: &StoreInfo) {
    println!("Store:    {}", info.code);
    println!("Path:     {}", info.path.display());
    println!("Bar size: {}", info.bar_size);
    println!("Created:  {}", info.created_at.to_rfc3339());
    println!("Rows:     {}", info.row_count);
    println!("Size:     {} bytes", info.size_bytes);

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Column", "DType"]);
    for column in &info.columns {
        table.add_row(vec![column.name.clone(), column.dtype.to_string()]);
    }
    println!("{table}");
}

async fn handle_insert(catalog: &StoreCatalog, args: InsertArgs) -> anyhow::Result<()> {
    let schema = catalog
        .schema(&args.code)
        .await
        .with_context(|| format!("Failed to open store '{}'", args.code))?;

    let raw = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let json: JsonValue = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", args.file.display()))?;
    let Some(objects) = json.as_array() else {
        bail!("{} must hold a JSON array of records", args.file.display());
    };

    let mut records = Vec::with_capacity(objects.len());
    for (i, object) in objects.iter().enumerate() {
        let Some(object) = object.as_object() else {
            bail!("record {} is not a JSON object", i);
        };
        let record = Record::from_json(object, &schema)
            .with_context(|| format!("record {} is invalid", i))?;
        records.push(record);
    }

    let written = catalog
        .insert(&args.code, &InsertFrame::Records(records), args.mode)
        .await
        .with_context(|| format!("Failed to insert into store '{}'", args.code))?;
    println!("Wrote {} rows to '{}' ({}).", written, args.code, args.mode);
    Ok(())
}

async fn handle_query(catalog: &StoreCatalog, args: QueryArgs) -> anyhow::Result<()> {
    let filter = QueryFilter {
        start_date: args.from,
        end_date: args.to,
        asset_ids: (!args.assets.is_empty()).then_some(args.assets),
        columns: (!args.columns.is_empty()).then_some(args.columns),
    };
    let result = catalog
        .query(&args.code, &filter)
        .await
        .with_context(|| format!("Failed to query store '{}'", args.code))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result.to_json())?);
        return Ok(());
    }

    let mut header = vec!["date".to_string(), "asset_id".to_string()];
    header.extend(result.columns.iter().map(|c| c.name.clone()));
    if args.inserted_at {
        header.push("inserted_at".to_string());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(header);
    for row in &result.rows {
        let mut cells = vec![format_date(&row.date), row.asset_id.to_string()];
        cells.extend(row.values.iter().map(|v| match v {
            Some(value) => value.to_string(),
            None => String::new(),
        }));
        if args.inserted_at {
            cells.push(row.inserted_at.as_ref().map(format_datetime).unwrap_or_default());
        }
        table.add_row(cells);
    }
    println!("{table}");
    println!("{} rows", result.len());
    Ok(())
}
