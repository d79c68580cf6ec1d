//! # li3ds-provision
//!
//! Provisioning of LI3DS acquisition sources as PostgreSQL point-cloud tables.
//!
//! This library registers ROS bags, EchoPulse captures and SBET trajectories
//! as multicorn foreign tables typed with pgpointcloud `pcpatch`, with
//! support for:
//!
//! - **Injection-safe DDL** rendered from templates with typed bindings
//! - **Driver contracts** checked against the live wrapper enumeration
//! - **pcid allocation** serialized on the format registry
//! - **Schema import** of remote relations together with their formats
//! - **Trajectory views** converting SBET attitude and GPS time to a
//!   canonical quaternion layout
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use li3ds_provision::{Config, OptionMap, PgEngine, Provisioner};
//!
//! #[tokio::main]
//! async fn main() -> li3ds_provision::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let engine = Arc::new(PgEngine::connect(&config).await?);
//!     let provisioner = Provisioner::new(engine, config.provisioning.clone())?;
//!
//!     let options: OptionMap = [("topic", "/imu/data")].into_iter().collect();
//!     let table = provisioner
//!         .create_table("li3ds.imu", "bags", 0, &options)
//!         .await?;
//!     println!("{} uses pcid {:?}", table.qualified(), table.pcid);
//!     Ok(())
//! }
//! ```

pub mod allocator;
pub mod api;
pub mod config;
pub mod core;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod provision;
pub mod trajectory;

// Re-exports for convenient access
pub use allocator::{Allocation, PcidAllocator};
pub use api::{Api, ApiResponse};
pub use config::{Config, DatabaseConfig, ProvisioningConfig};
pub use crate::core::{
    Engine, ForeignServer, ForeignTable, MaterializedView, OptionMap, QualifiedName, Transaction,
};
pub use drivers::Driver;
pub use engine::{PgEngine, SslMode};
pub use error::{ProvisionError, Result};
pub use provision::{ImportedSchema, Provisioner};
pub use trajectory::{GpsWeek, Quaternion};
