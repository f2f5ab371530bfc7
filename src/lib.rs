//! Koban Sync Library
//!
//! Syncs shop orders, customers and products to the Koban CRM through
//! retryable, resumable workflows. Exposed as a library for the binary and
//! for tests.

pub mod config;
pub mod drivers;
pub mod jobs;
pub mod koban;
pub mod shop;
pub mod sqlite_persistence;
pub mod store;
pub mod workflow;

// Re-export commonly used types for convenience
pub use config::{AppConfig, CliConfig, FileConfig};
pub use drivers::{SyncContext, SyncDrivers};
pub use jobs::{SyncJob, SyncWorker};
pub use store::SqliteSyncStore;
