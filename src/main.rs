use std::sync::Arc;

use dispatch::config::Config;
use dispatch::error::Error;
use dispatch::simulation::{Executor, Plan};
use dispatch::store::{MemoryStore, PgStore};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let summary = match config.database_url.clone() {
        Some(url) => {
            let store = Arc::new(PgStore::new(&url, 5).await?);
            Executor::new(config, Plan::default(), store)?.run().await?
        }
        None => {
            let store = Arc::new(MemoryStore::new());
            Executor::new(config, Plan::default(), store)?.run().await?
        }
    };

    tracing::info!(
        summary = %serde_json::to_string(&summary)?,
        "simulation finished"
    );

    Ok(())
}
