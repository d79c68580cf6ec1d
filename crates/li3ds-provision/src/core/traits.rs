//! Storage engine abstraction.
//!
//! Provisioning components never talk to PostgreSQL directly. They receive an
//! [`Engine`] handle and submit rendered [`Statement`]s through it, either in
//! autocommit mode or inside a [`Transaction`] for atomic units.
//!
//! - [`Engine`]: statement execution, driver enumeration and catalog reads
//! - [`Transaction`]: scoped atomic unit obtained from [`Engine::begin`]
//!
//! A transaction that is dropped without [`Transaction::commit`] must not
//! leave its work visible.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::Result;

use super::catalog::{ForeignServer, ForeignTable, MaterializedView};
use super::identifier::QualifiedName;
use super::statement::Statement;
use super::value::Row;

/// Storage engine capabilities consumed by the provisioner.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Execute a statement in autocommit mode, returning the affected row count.
    async fn execute(&self, statement: &Statement) -> Result<u64>;

    /// Run a row-returning statement in autocommit mode.
    async fn query(&self, statement: &Statement) -> Result<Vec<Row>>;

    /// Driver identifiers currently offered by the foreign-data wrapper.
    ///
    /// Fetched from the live engine on every call.
    async fn enumerate_drivers(&self) -> Result<BTreeSet<String>>;

    /// Foreign servers of the configured wrapper.
    async fn read_servers(&self) -> Result<Vec<ForeignServer>>;

    /// Foreign tables served by the configured wrapper.
    async fn read_tables(&self) -> Result<Vec<ForeignTable>>;

    /// Materialized views with their definitions.
    async fn read_views(&self) -> Result<Vec<MaterializedView>>;

    /// Whether a relation of any kind exists under this name.
    async fn relation_exists(&self, name: &QualifiedName) -> Result<bool>;

    /// Start an atomic unit.
    async fn begin(&self) -> Result<Box<dyn Transaction + '_>>;

    /// Engine name for logging.
    fn name(&self) -> &str;
}

/// One open engine transaction.
#[async_trait]
pub trait Transaction: Send {
    async fn execute(&mut self, statement: &Statement) -> Result<u64>;

    async fn query(&mut self, statement: &Statement) -> Result<Vec<Row>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
