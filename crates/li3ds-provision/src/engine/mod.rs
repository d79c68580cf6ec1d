//! Storage engine implementations.
//!
//! - [`postgres`]: PostgreSQL over a deadpool-postgres pool, rustls for TLS

pub mod postgres;

#[cfg(test)]
pub(crate) mod memory;

pub use postgres::{PgEngine, PgTransaction, SslMode};
