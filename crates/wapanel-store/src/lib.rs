//! # wapanel-store
//!
//! Persisted client state for wapanel (SQLite-backed).

pub mod store;

pub use store::SqliteStateStore;

use std::sync::Arc;
use wapanel_core::{
    config::StoreConfig, error::PanelError, state::MemoryStateStore, traits::StateStore,
};

/// Open the store named by `[store] backend`.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn StateStore>, PanelError> {
    match config.backend.as_str() {
        "sqlite" => Ok(Arc::new(SqliteStateStore::new(config).await?)),
        "memory" => Ok(Arc::new(MemoryStateStore::new())),
        other => Err(PanelError::Config(format!(
            "unknown store backend '{other}' (expected sqlite or memory)"
        ))),
    }
}
