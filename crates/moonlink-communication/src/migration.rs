//! Post-connect migrations
//!
//! The readiness gate runs a [`MigrationRunner`] every time the channel
//! opens and only lets callers through once it succeeds. Runners must be
//! idempotent and resolve only once the backing store is at the latest
//! schema version.

use async_trait::async_trait;
use moonlink_core::MigrationError;

/// Brings the backing store to the latest schema version
#[async_trait]
pub trait MigrationRunner: Send + Sync {
    /// Run all outstanding migrations
    async fn run_migrations(&self) -> Result<(), MigrationError>;
}

/// Runner for deployments without a schema to migrate
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMigrations;

#[async_trait]
impl MigrationRunner for NoMigrations {
    async fn run_migrations(&self) -> Result<(), MigrationError> {
        Ok(())
    }
}
