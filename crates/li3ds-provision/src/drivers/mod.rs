//! Foreign-data driver contracts.
//!
//! Each multicorn wrapper class is a driver. The known drivers declare which
//! table options they require and which they accept; any other driver that
//! the engine enumerates falls back to a generic contract without required
//! keys.
//!
//! | Driver | Required | Optional |
//! |---|---|---|
//! | `fdwli3ds.Rosbag` | `topic` | `rosbag` |
//! | `fdwli3ds.EchoPulse` | `directory` | `ext` |
//! | `fdwli3ds.Sbet` | `sbet` | |

use std::collections::BTreeSet;
use std::fmt;

use tracing::debug;

use crate::core::OptionMap;
use crate::error::{ProvisionError, Result};

pub const ROSBAG: &str = "fdwli3ds.Rosbag";
pub const ECHO_PULSE: &str = "fdwli3ds.EchoPulse";
pub const SBET: &str = "fdwli3ds.Sbet";

/// Server option carrying the driver class; set by the provisioner.
pub const WRAPPER_OPTION: &str = "wrapper";
/// Table option carrying the registry key; set by the provisioner.
pub const PCID_OPTION: &str = "pcid";
/// Table option switching a driver to schema-introspection mode.
pub const METADATA_OPTION: &str = "metadata";

const SERVER_RESERVED: &[&str] = &[WRAPPER_OPTION];
const TABLE_RESERVED: &[&str] = &[PCID_OPTION, METADATA_OPTION];

/// Option keys a driver requires and accepts for its tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverContract {
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
}

impl DriverContract {
    const GENERIC: DriverContract = DriverContract {
        required: &[],
        optional: &[],
    };

    /// Whether the contract lists keys at all; generic contracts accept any.
    fn is_generic(&self) -> bool {
        self.required.is_empty() && self.optional.is_empty()
    }

    fn accepts(&self, key: &str) -> bool {
        self.is_generic() || self.required.contains(&key) || self.optional.contains(&key)
    }
}

/// A multicorn driver class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Driver {
    /// ROS bag capture.
    Rosbag,
    /// LiDAR pulse capture.
    EchoPulse,
    /// SBET trajectory.
    Sbet,
    /// Any other enumerated wrapper class.
    Other(String),
}

impl Driver {
    pub fn from_name(name: &str) -> Self {
        match name {
            ROSBAG => Driver::Rosbag,
            ECHO_PULSE => Driver::EchoPulse,
            SBET => Driver::Sbet,
            other => Driver::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Driver::Rosbag => ROSBAG,
            Driver::EchoPulse => ECHO_PULSE,
            Driver::Sbet => SBET,
            Driver::Other(name) => name,
        }
    }

    pub fn contract(&self) -> DriverContract {
        match self {
            Driver::Rosbag => DriverContract {
                required: &["topic"],
                optional: &["rosbag"],
            },
            Driver::EchoPulse => DriverContract {
                required: &["directory"],
                optional: &["ext"],
            },
            Driver::Sbet => DriverContract {
                required: &["sbet"],
                optional: &[],
            },
            Driver::Other(_) => DriverContract::GENERIC,
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolve a driver name against the live enumeration.
pub fn validate_driver(name: &str, available: &BTreeSet<String>) -> Result<Driver> {
    if !available.contains(name) {
        return Err(ProvisionError::DriverNotFound {
            driver: name.to_string(),
            available: available.iter().cloned().collect(),
        });
    }
    Ok(Driver::from_name(name))
}

/// Check caller-supplied server options.
pub fn validate_server_options(options: &OptionMap) -> Result<()> {
    options.reject_reserved(SERVER_RESERVED)
}

/// Check caller-supplied table options against the driver contract.
pub fn validate_table_options(driver: &Driver, options: &OptionMap) -> Result<()> {
    options.reject_reserved(TABLE_RESERVED)?;

    let contract = driver.contract();
    if let Some(key) = contract.required.iter().find(|k| !options.contains_key(k)) {
        return Err(ProvisionError::MissingOption {
            driver: driver.name().to_string(),
            key: key.to_string(),
        });
    }

    for (key, _) in options.iter().filter(|(k, _)| !contract.accepts(k)) {
        debug!("{}: passing undeclared option '{}' through", driver, key);
    }

    Ok(())
}

/// Options of the transient table used to read a driver's point layout.
///
/// `metadata 'true'` plus the caller's values of the required keys.
pub fn introspection_options(driver: &Driver, options: &OptionMap) -> Result<OptionMap> {
    let mut probe = options.restricted_to(driver.contract().required);
    probe.insert(METADATA_OPTION, "true")?;
    Ok(probe)
}
