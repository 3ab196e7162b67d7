use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use medicontent_qa::airtable::model::ListQuery;
use medicontent_qa::airtable::{AirtableClient, Datastore, Table};
use medicontent_qa::config;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Which {
    Posts,
    Requests,
}

#[derive(Parser, Debug)]
#[command(about = "Print records of one Airtable table")]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[arg(value_enum)]
    table: Which,

    /// Optional filterByFormula expression
    #[arg(long)]
    formula: Option<String>,

    #[arg(long, default_value_t = 10)]
    limit: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let client = AirtableClient::from_config(&cfg)?;

    let table = match args.table {
        Which::Posts => Table::Posts,
        Which::Requests => Table::Requests,
    };
    let mut query = ListQuery::default().limit(args.limit);
    query.formula = args.formula;

    let records = client.list_records(table, &query).await?;
    println!("Table: {}", client.tables().name(table));
    for record in records {
        println!("{} (created {:?})", record.id, record.created_time);
        for (name, value) in &record.fields {
            println!("  {} -> {}", name, value);
        }
    }
    Ok(())
}
