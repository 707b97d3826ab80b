use std::sync::Arc;

use donkey_core::{
    config::Config,
    store::{MemoryStore, Store},
};

#[tokio::main]
async fn main() -> Result<(), donkey_core::Error> {
    donkey_core::logging::init("donkey")?;

    let cfg = Arc::new(Config::load()?);

    let store: Arc<dyn Store> = match &cfg.store_path {
        Some(path) => Arc::new(MemoryStore::open(path.clone())?),
        None => {
            tracing::warn!("STORE_PATH is empty; state is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    donkey_telegram::router::run_polling(cfg, store)
        .await
        .map_err(|e| donkey_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
