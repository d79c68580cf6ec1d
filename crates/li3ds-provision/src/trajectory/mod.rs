//! Trajectory materialization pipeline.
//!
//! Turns SBET samples (heading/pitch/roll, lon/lat/elevation, seconds in GPS
//! week) into the canonical eight-dimension layout:
//!
//! - [`orientation`]: ZYX quaternion composition
//! - [`time`]: GPS week alignment from the source table name
//! - [`layout`]: registry descriptors per projection
//! - [`view`]: materialized view statements
//! - [`patch`]: per-row patch packing

pub mod layout;
pub mod orientation;
pub mod patch;
pub mod time;
pub mod view;

pub use layout::{descriptor, Projection};
pub use orientation::Quaternion;
pub use patch::{pack_patches, Patch, SbetSample, TrajectoryPoint};
pub use time::GpsWeek;
pub use view::{create_view_statement, ViewLayout};
