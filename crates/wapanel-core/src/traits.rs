use crate::error::PanelError;
use async_trait::async_trait;

/// Durable key-value store for persisted client state.
///
/// Values are opaque strings (usually JSON). Implementations must be safe to
/// share between the discovery client, the HTTP client, and the CLI.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a value, `None` if the key was never written or was removed.
    async fn get(&self, key: &str) -> Result<Option<String>, PanelError>;

    /// Insert or replace a value.
    async fn set(&self, key: &str, value: &str) -> Result<(), PanelError>;

    /// Delete a value. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), PanelError>;
}

/// Backend commands that control a running bulk send.
#[async_trait]
pub trait BulkCommands: Send + Sync {
    async fn pause_bulk(&self) -> Result<(), PanelError>;

    async fn resume_bulk(&self) -> Result<(), PanelError>;

    async fn cancel_bulk(&self) -> Result<(), PanelError>;
}
