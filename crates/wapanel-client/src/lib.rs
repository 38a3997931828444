//! # wapanel-client
//!
//! Client-side plumbing for the WhatsApp automation backend: port discovery,
//! the HTTP API client, the realtime channel, and the bulk queue facade.

pub mod api;
pub mod backend;
pub mod discovery;
pub mod queue;
pub mod realtime;
pub mod single_flight;

#[cfg(test)]
pub(crate) mod testing;

pub use api::ApiClient;
pub use backend::Backend;
pub use discovery::{DiscoverOptions, Discovery};
pub use queue::{BulkQueueControl, QueueStatus};
pub use realtime::{ChannelState, RealtimeChannel, RealtimeClient};
