//! Durable persistence (C4) for events, alerts, pseudonym mappings, and
//! scheduled reports, plus an in-memory implementation for tests.

pub mod config;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use config::StoreConfig;
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use traits::{
    EventQuery, IntegrityFailure, IntegrityVerificationReport, Pagination, QueryResult,
    RetentionEnforcementResult, SortBy, SortOrder, Store,
};

use crate::error::Result;
use std::sync::Arc;

/// Connects a [`PostgresStore`] and creates its tables, returning it behind
/// the [`Store`] trait object the rest of the crate depends on.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn Store>> {
    let store = PostgresStore::connect(&config.connection_string, config.max_connections).await?;
    Ok(Arc::new(store))
}
