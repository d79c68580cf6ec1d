//! Configuration validation.

use super::Config;
use crate::core::identifier::validate_identifier;
use crate::engine::SslMode;
use crate::error::{ProvisionError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Database validation
    if config.database.host.is_empty() {
        return Err(ProvisionError::Config("database.host is required".into()));
    }
    if config.database.database.is_empty() {
        return Err(ProvisionError::Config("database.database is required".into()));
    }
    if config.database.user.is_empty() {
        return Err(ProvisionError::Config("database.user is required".into()));
    }
    if config.database.max_connections == 0 {
        return Err(ProvisionError::Config(
            "database.max_connections must be at least 1".into(),
        ));
    }
    config.database.ssl_mode.parse::<SslMode>()?;

    // Provisioning validation
    let provisioning = &config.provisioning;
    for (field, value) in [
        ("provisioning.fdw", &provisioning.fdw),
        ("provisioning.registry_schema", &provisioning.registry_schema),
        ("provisioning.registry_table", &provisioning.registry_table),
        ("provisioning.driver_language", &provisioning.driver_language),
    ] {
        validate_identifier(value)
            .map_err(|e| ProvisionError::Config(format!("{} is invalid: {}", field, e)))?;
    }
    if provisioning.default_srid <= 0 {
        return Err(ProvisionError::Config(format!(
            "provisioning.default_srid must be positive, got {}",
            provisioning.default_srid
        )));
    }

    Ok(())
}
