//! Error types for the provisioning library.

use thiserror::Error;

/// SQLSTATE for `unique_violation`.
pub const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";
/// SQLSTATE for `duplicate_object` (servers, indexes, ...).
pub const SQLSTATE_DUPLICATE_OBJECT: &str = "42710";
/// SQLSTATE for `duplicate_table` (tables, foreign tables, views).
pub const SQLSTATE_DUPLICATE_TABLE: &str = "42P07";

/// Message returned to callers in place of engine diagnostics.
const SANITIZED_ENGINE_MESSAGE: &str = "Database error";

/// Main error type for provisioning operations.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// A `schema.name` input did not split into exactly two parts.
    #[error("{kind} should be in the form schema.{kind}, got {input:?}")]
    MalformedName { kind: &'static str, input: String },

    /// An identifier failed validation (empty, NUL byte, too long).
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Requested driver is not part of the live driver enumeration.
    #[error("{driver} driver does not exist, available drivers are {available:?}")]
    DriverNotFound {
        driver: String,
        available: Vec<String>,
    },

    /// Driver contract requires an option that was not supplied.
    #[error("{driver} requires the '{key}' option")]
    MissingOption { driver: String, key: String },

    /// Option key or value cannot be used.
    #[error("Invalid option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },

    /// Referenced foreign server does not exist.
    #[error("Foreign server {0} does not exist")]
    ServerNotFound(String),

    /// A dependent resource (e.g. source table of a view) is missing.
    #[error("{kind} {name} not found")]
    ResourceNotFound { kind: &'static str, name: String },

    /// Engine-level uniqueness violation on a provisioned resource.
    #[error("{0} already exists")]
    ResourceExists(String),

    /// Concurrent pcid allocation collided and the retry budget is spent.
    #[error("pcid allocation conflict for {target} after {attempts} attempt(s)")]
    AllocationConflict { target: String, attempts: u32 },

    /// Acquisition date could not be derived from a table name.
    #[error("Bad table name {table:?}: {reason}")]
    BadTableName { table: String, reason: String },

    /// SRID not usable for the requested operation.
    #[error("Invalid SRID {srid}: {reason}")]
    InvalidSrid { srid: i32, reason: &'static str },

    /// Mutually inconsistent request flags.
    #[error("Inconsistent options: {0}")]
    InconsistentOptions(String),

    /// A multi-statement sequence failed after earlier statements committed.
    #[error(
        "{operation} failed at step '{failed_step}' after completing {completed:?}; \
         objects that may remain: {leftovers:?}"
    )]
    PartialProvisioning {
        operation: &'static str,
        failed_step: &'static str,
        completed: Vec<&'static str>,
        leftovers: Vec<String>,
        #[source]
        source: Box<ProvisionError>,
    },

    /// Opaque downstream engine failure.
    #[error("Engine error{}: {message}", sqlstate_suffix(.sqlstate))]
    Engine {
        sqlstate: Option<String>,
        message: String,
    },

    /// Statement template could not be rendered.
    #[error("Statement template error: {0}")]
    Template(String),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tokio_postgres::Error> for ProvisionError {
    fn from(err: tokio_postgres::Error) -> Self {
        let sqlstate = err.code().map(|code| code.code().to_string());
        let message = match err.as_db_error() {
            Some(db) => match db.detail() {
                Some(detail) => format!("{} ({})", db.message(), detail),
                None => db.message().to_string(),
            },
            None => err.to_string(),
        };
        ProvisionError::Engine { sqlstate, message }
    }
}

impl From<deadpool_postgres::PoolError> for ProvisionError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        ProvisionError::pool(err, "acquiring PostgreSQL connection")
    }
}

impl ProvisionError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        ProvisionError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create an engine error without SQLSTATE.
    pub fn engine(message: impl Into<String>) -> Self {
        ProvisionError::Engine {
            sqlstate: None,
            message: message.into(),
        }
    }

    /// Create a MalformedName error.
    pub fn malformed(kind: &'static str, input: impl Into<String>) -> Self {
        ProvisionError::MalformedName {
            kind,
            input: input.into(),
        }
    }

    /// SQLSTATE of an engine error, if any.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            ProvisionError::Engine { sqlstate, .. } => sqlstate.as_deref(),
            _ => None,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate() == Some(SQLSTATE_UNIQUE_VIOLATION)
    }

    /// True for engine errors raised by `CREATE` on an existing name.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self.sqlstate(),
            Some(SQLSTATE_DUPLICATE_OBJECT) | Some(SQLSTATE_DUPLICATE_TABLE)
        )
    }

    /// HTTP-style status class for the request-level API.
    pub fn status_code(&self) -> u16 {
        match self {
            ProvisionError::MalformedName { .. }
            | ProvisionError::InvalidIdentifier(_)
            | ProvisionError::DriverNotFound { .. }
            | ProvisionError::MissingOption { .. }
            | ProvisionError::InvalidOption { .. }
            | ProvisionError::ServerNotFound(_)
            | ProvisionError::BadTableName { .. }
            | ProvisionError::InvalidSrid { .. }
            | ProvisionError::InconsistentOptions(_)
            | ProvisionError::Json(_) => 400,
            ProvisionError::ResourceNotFound { .. } => 404,
            ProvisionError::ResourceExists(_) | ProvisionError::AllocationConflict { .. } => 409,
            ProvisionError::PartialProvisioning { .. }
            | ProvisionError::Engine { .. }
            | ProvisionError::Template(_)
            | ProvisionError::Pool { .. }
            | ProvisionError::Config(_)
            | ProvisionError::Io(_)
            | ProvisionError::Yaml(_) => 500,
        }
    }

    /// Message safe to hand to a remote caller.
    ///
    /// Engine and pool diagnostics are replaced by a generic message unless
    /// `expose_engine` is set; the full error is expected to be logged.
    pub fn public_message(&self, expose_engine: bool) -> String {
        match self {
            ProvisionError::Engine { .. } | ProvisionError::Pool { .. } if !expose_engine => {
                SANITIZED_ENGINE_MESSAGE.to_string()
            }
            ProvisionError::PartialProvisioning {
                operation,
                failed_step,
                completed,
                leftovers,
                source,
            } if !expose_engine => format!(
                "{} failed at step '{}' after completing {:?}; objects that may remain: {:?} ({})",
                operation,
                failed_step,
                completed,
                leftovers,
                source.public_message(false)
            ),
            other => other.to_string(),
        }
    }

    /// Process exit code used by the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            ProvisionError::Config(_) | ProvisionError::Yaml(_) => 1,
            ProvisionError::MalformedName { .. }
            | ProvisionError::InvalidIdentifier(_)
            | ProvisionError::DriverNotFound { .. }
            | ProvisionError::MissingOption { .. }
            | ProvisionError::InvalidOption { .. }
            | ProvisionError::BadTableName { .. }
            | ProvisionError::InvalidSrid { .. }
            | ProvisionError::InconsistentOptions(_)
            | ProvisionError::Json(_) => 2,
            ProvisionError::ResourceExists(_) | ProvisionError::AllocationConflict { .. } => 3,
            ProvisionError::ServerNotFound(_) | ProvisionError::ResourceNotFound { .. } => 4,
            ProvisionError::Engine { .. }
            | ProvisionError::Pool { .. }
            | ProvisionError::Template(_) => 5,
            ProvisionError::PartialProvisioning { .. } => 6,
            ProvisionError::Io(_) => 7,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

fn sqlstate_suffix(sqlstate: &Option<String>) -> String {
    sqlstate
        .as_deref()
        .map(|code| format!(" [{}]", code))
        .unwrap_or_default()
}

/// Result type alias for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;
