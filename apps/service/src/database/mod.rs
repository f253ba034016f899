/// Persistence layer
///
/// Service and user records live in a local LibSQL (SQLite) database behind the
/// [`Store`] trait, which the registry, quota tracker, selector and reconciler share.

pub mod migrations;
pub mod models;
pub mod repository;

pub use models::{ServiceKey, ServiceRecord, UserRecord};
pub use repository::{LibsqlStore, Store, StoreError, StoreResult, UpsertOutcome};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
