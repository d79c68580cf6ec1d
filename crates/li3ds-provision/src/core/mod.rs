//! Core abstractions for resource provisioning.
//!
//! - [`identifier`]: identifier validation and quoting
//! - [`statement`]: identifier-safe statement templates
//! - [`options`]: normalized driver option maps
//! - [`value`]: SQL values and result rows
//! - [`catalog`]: servers, tables and views as read from the engine
//! - [`traits`]: the storage engine abstraction

pub mod catalog;
pub mod identifier;
pub mod options;
pub mod statement;
pub mod traits;
pub mod value;

// Re-export commonly used types for convenience
pub use catalog::{ForeignServer, ForeignTable, MaterializedView};
pub use identifier::{quote_literal, quote_pg, QualifiedName};
pub use options::OptionMap;
pub use statement::{Bind, SqlTemplate, Statement, StatementKind};
pub use traits::{Engine, Transaction};
pub use value::{Row, SqlValue};
