//! Print every row stored for a topic as one JSON object per line.
use std::io::Write;

use envconfig::Envconfig;
use railfeed::client::load_persisted;
use railfeed_common::topics::{table_name_for, TopicRegistry};
use serde_json::{Map, Value};

#[derive(Envconfig)]
struct DumpConfig {
    #[envconfig(from = "TOPIC", default = "MVT")]
    topic: String,

    #[envconfig(from = "DATABASE_PATH")]
    database_path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = DumpConfig::init_from_env().expect("Invalid configuration:");
    let registry = TopicRegistry::default();
    let descriptor = registry.lookup(&config.topic)?;

    let path = config.database_path.unwrap_or_else(|| descriptor.storage.clone());
    let table = table_name_for(&path);

    let rows = load_persisted(&path, table).await?;
    tracing::info!(path = %path, table, rows = rows.len(), "loaded rows");

    let mut out = std::io::stdout().lock();
    for row in rows {
        let object: Map<String, Value> = descriptor
            .schema
            .names()
            .zip(row.values())
            .map(|(name, value)| Ok((name.to_owned(), serde_json::to_value(value)?)))
            .collect::<Result<_, serde_json::Error>>()?;
        writeln!(out, "{}", Value::Object(object))?;
    }

    Ok(())
}
