//! # wapanel-core
//!
//! Core types, traits, configuration, and error handling shared by the
//! wapanel client crates.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod state;
pub mod traits;
