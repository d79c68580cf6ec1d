//! Foreign resource provisioner.
//!
//! Creates multicorn servers, pcpatch foreign tables, imported schemas and
//! materialized views. Inputs are validated before any DDL is sent; every
//! created resource is returned as re-read from the engine catalog.
//!
//! Table creation is a sequence of autocommitted steps. A failure after the
//! first step is reported as [`ProvisionError::PartialProvisioning`] with the
//! objects that may have been left behind; nothing is compensated.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::allocator::{Allocation, PcidAllocator};
use crate::config::ProvisioningConfig;
use crate::core::identifier::validate_identifier;
use crate::core::{
    Engine, ForeignServer, ForeignTable, MaterializedView, OptionMap, QualifiedName, SqlTemplate,
    SqlValue, Statement, Transaction,
};
use crate::drivers::{
    introspection_options, validate_driver, validate_server_options, validate_table_options,
    PCID_OPTION, WRAPPER_OPTION,
};
use crate::error::{ProvisionError, Result};
use crate::trajectory::{create_view_statement, descriptor, GpsWeek, Projection, ViewLayout};

const CREATE_SERVER_SQL: &str =
    "CREATE SERVER {name} FOREIGN DATA WRAPPER {fdw} OPTIONS ({options})";

const CREATE_PROBE_SQL: &str =
    "CREATE FOREIGN TABLE {table} (schema text) SERVER {server} OPTIONS ({options})";
const READ_PROBE_SQL: &str = "SELECT schema FROM {table}";
const DROP_PROBE_SQL: &str = "DROP FOREIGN TABLE {table}";

const CREATE_TABLE_SQL: &str =
    "CREATE FOREIGN TABLE {table} (points pcpatch({pcid})) SERVER {server} OPTIONS ({options})";

const CREATE_SCHEMA_SQL: &str = "CREATE SCHEMA IF NOT EXISTS {schema}";
const IMPORT_REGISTRY_SQL: &str = "IMPORT FOREIGN SCHEMA {remote} LIMIT TO (pointcloud_formats)
FROM SERVER {server} INTO {schema} OPTIONS ({options})";
const COPY_REGISTRY_SQL: &str = "INSERT INTO {registry} (pcid, srid, schema)
SELECT pcid, srid, schema FROM {imported}";
const IMPORT_REST_SQL: &str = "IMPORT FOREIGN SCHEMA {remote} EXCEPT (pointcloud_formats)
FROM SERVER {server} INTO {schema} OPTIONS ({options})";

/// Relation name of the format registry on both sides of a schema import.
const REGISTRY_RELATION: &str = "pointcloud_formats";

/// Suffix of the transient table used to read a driver's point layout.
const PROBE_SUFFIX: &str = "_schema";

/// Outcome of [`Provisioner::import_schema`].
#[derive(Debug, Clone, Serialize)]
pub struct ImportedSchema {
    pub schema: String,
    /// Next registry pcid at import time, passed to the driver as `pcid`.
    pub pcid: i32,
    /// Foreign tables of the schema after the import.
    pub tables: Vec<ForeignTable>,
}

/// Tracks the completed steps of a non-transactional sequence.
struct Progress {
    operation: &'static str,
    completed: Vec<&'static str>,
    leftovers: Vec<String>,
}

impl Progress {
    fn new(operation: &'static str) -> Self {
        Self {
            operation,
            completed: Vec::new(),
            leftovers: Vec::new(),
        }
    }

    fn done(&mut self, step: &'static str) {
        debug!("{}: {} done", self.operation, step);
        self.completed.push(step);
    }

    fn leave(&mut self, object: impl Into<String>) {
        self.leftovers.push(object.into());
    }

    fn cleared(&mut self, object: &str) {
        self.leftovers.retain(|o| o != object);
    }

    /// Wrap `source` as a partial failure once any step has completed.
    fn fail(self, step: &'static str, source: ProvisionError) -> ProvisionError {
        if self.completed.is_empty() {
            return source;
        }
        warn!(
            "{} failed at {} after {:?}; objects that may remain: {:?}",
            self.operation, step, self.completed, self.leftovers
        );
        ProvisionError::PartialProvisioning {
            operation: self.operation,
            failed_step: step,
            completed: self.completed,
            leftovers: self.leftovers,
            source: Box::new(source),
        }
    }
}

/// Provisions foreign resources through an [`Engine`].
pub struct Provisioner {
    engine: Arc<dyn Engine>,
    config: ProvisioningConfig,
    registry: QualifiedName,
}

impl Provisioner {
    pub fn new(engine: Arc<dyn Engine>, config: ProvisioningConfig) -> Result<Self> {
        let registry = config.registry()?;
        Ok(Self {
            engine,
            config,
            registry,
        })
    }

    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    pub fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    fn allocator(&self) -> PcidAllocator<'_> {
        PcidAllocator::new(
            self.engine.as_ref(),
            &self.registry,
            self.config.allocation_retries,
        )
    }

    // =========================================================================
    // Catalog reads
    // =========================================================================

    pub async fn list_drivers(&self) -> Result<BTreeSet<String>> {
        self.engine.enumerate_drivers().await
    }

    pub async fn list_servers(&self) -> Result<Vec<ForeignServer>> {
        self.engine.read_servers().await
    }

    pub async fn list_tables(&self) -> Result<Vec<ForeignTable>> {
        self.engine.read_tables().await
    }

    pub async fn list_views(&self) -> Result<Vec<MaterializedView>> {
        self.engine.read_views().await
    }

    async fn find_server(&self, name: &str) -> Result<ForeignServer> {
        self.engine
            .read_servers()
            .await?
            .into_iter()
            .find(|server| server.name == name)
            .ok_or_else(|| ProvisionError::ServerNotFound(name.to_string()))
    }

    async fn find_table(&self, name: &QualifiedName) -> Result<ForeignTable> {
        self.engine
            .read_tables()
            .await?
            .into_iter()
            .find(|t| t.schema == name.schema && t.table == name.name)
            .ok_or_else(|| missing_after_create("foreign table", name))
    }

    // =========================================================================
    // Servers
    // =========================================================================

    /// Create a foreign server bound to `driver`.
    pub async fn create_server(
        &self,
        name: &str,
        driver: &str,
        options: &OptionMap,
    ) -> Result<ForeignServer> {
        validate_identifier(name)?;
        validate_server_options(options)?;
        let available = self.engine.enumerate_drivers().await?;
        let driver = validate_driver(driver, &available)?;

        let mut server_options = options.clone();
        server_options.insert(WRAPPER_OPTION, driver.name())?;

        let statement = SqlTemplate::utility("server.create", CREATE_SERVER_SQL)
            .ident("name", name)
            .ident("fdw", self.config.fdw.as_str())
            .options("options", &server_options)
            .build()?;
        self.engine
            .execute(&statement)
            .await
            .map_err(|e| exists_or(e, "server", name))?;
        info!("Created server {} ({})", name, driver);

        self.engine
            .read_servers()
            .await?
            .into_iter()
            .find(|server| server.name == name)
            .ok_or_else(|| {
                ProvisionError::engine(format!("server {} missing from catalog after creation", name))
            })
    }

    // =========================================================================
    // Tables
    // =========================================================================

    /// Create `schema.table` as a pcpatch foreign table on `server`.
    ///
    /// The driver's point layout is read through a transient
    /// `<table>_schema` foreign table, registered under `srid` (0 when the
    /// points are unprojected), and the resulting pcid types the `points`
    /// column.
    pub async fn create_table(
        &self,
        table: &str,
        server: &str,
        srid: i32,
        options: &OptionMap,
    ) -> Result<ForeignTable> {
        let name = QualifiedName::parse("table", table)?;
        if srid < 0 {
            return Err(ProvisionError::InvalidSrid {
                srid,
                reason: "table srids are 0 or positive",
            });
        }
        let probe = name.with_suffix(PROBE_SUFFIX)?;
        validate_identifier(server)?;

        let foreign_server = self.find_server(server).await?;
        let available = self.engine.enumerate_drivers().await?;
        let driver = validate_driver(&foreign_server.driver, &available)?;
        validate_table_options(&driver, options)?;
        let probe_options = introspection_options(&driver, options)?;

        if self.engine.relation_exists(&name).await? {
            return Err(ProvisionError::ResourceExists(format!("table {}", name)));
        }

        let mut progress = Progress::new("create_table");

        let create_probe = SqlTemplate::utility("table.probe.create", CREATE_PROBE_SQL)
            .qualified("table", &probe)
            .ident("server", server)
            .options("options", &probe_options)
            .build()?;
        self.engine
            .execute(&create_probe)
            .await
            .map_err(|e| exists_or(e, "table", &probe.to_string()))?;
        progress.done("create_probe");
        progress.leave(probe.to_string());

        let descriptor = match self.read_probe(&probe).await {
            Ok(descriptor) => descriptor,
            Err(e) => return Err(progress.fail("read_descriptor", e)),
        };
        progress.done("read_descriptor");

        let Allocation { pcid, reused } = match self.allocator().allocate(srid, &descriptor).await
        {
            Ok(allocation) => allocation,
            Err(e) => return Err(progress.fail("allocate_pcid", e)),
        };
        progress.done("allocate_pcid");
        if !reused {
            progress.leave(format!("{} row pcid={}", self.registry, pcid));
        }

        let drop_probe = SqlTemplate::utility("table.probe.drop", DROP_PROBE_SQL)
            .qualified("table", &probe)
            .build()?;
        if let Err(e) = self.engine.execute(&drop_probe).await {
            return Err(progress.fail("drop_probe", e));
        }
        progress.done("drop_probe");
        progress.cleared(&probe.to_string());

        let mut table_options = options.clone();
        table_options.insert(PCID_OPTION, pcid.to_string())?;
        let create_table = SqlTemplate::utility("table.create", CREATE_TABLE_SQL)
            .qualified("table", &name)
            .integer("pcid", i64::from(pcid))
            .ident("server", server)
            .options("options", &table_options)
            .build()?;
        if let Err(e) = self.engine.execute(&create_table).await {
            return Err(progress.fail("create_table", e));
        }
        info!("Created foreign table {} (pcid {}, srid {})", name, pcid, srid);

        self.find_table(&name).await
    }

    async fn read_probe(&self, probe: &QualifiedName) -> Result<String> {
        let statement = SqlTemplate::query("table.probe.read", READ_PROBE_SQL)
            .qualified("table", probe)
            .build()?;
        let rows = self.engine.query(&statement).await?;
        rows.first()
            .and_then(|row| row.get("schema"))
            .and_then(SqlValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProvisionError::engine(format!("{} returned no point layout", probe)))
    }

    // =========================================================================
    // Schema import
    // =========================================================================

    /// Import the relations of `remote` on `server` into local `schema`.
    ///
    /// The remote registry rows are copied into the local registry and the
    /// whole import runs in one transaction under the registry lock.
    pub async fn import_schema(
        &self,
        schema: &str,
        remote: &str,
        server: &str,
    ) -> Result<ImportedSchema> {
        validate_identifier(schema)?;
        validate_identifier(remote)?;
        validate_identifier(server)?;
        self.find_server(server).await?;

        let mut attempts = 0;
        let pcid = loop {
            attempts += 1;
            match self.import_once(schema, remote, server).await {
                Err(e) if e.is_unique_violation() => {
                    if attempts > self.config.allocation_retries {
                        return Err(ProvisionError::AllocationConflict {
                            target: format!("schema {}", schema),
                            attempts,
                        });
                    }
                    warn!(
                        "registry copy for schema {} conflicted (attempt {}), retrying",
                        schema, attempts
                    );
                }
                Err(e) => return Err(exists_or(e, "schema relation", schema)),
                Ok(pcid) => break pcid,
            }
        };
        info!("Imported {} from server {} into schema {}", remote, server, schema);

        let tables = self
            .engine
            .read_tables()
            .await?
            .into_iter()
            .filter(|t| t.schema == schema)
            .collect();
        Ok(ImportedSchema {
            schema: schema.to_string(),
            pcid,
            tables,
        })
    }

    async fn import_once(&self, schema: &str, remote: &str, server: &str) -> Result<i32> {
        let mut tx = self.engine.begin().await?;
        match self.import_in(tx.as_mut(), schema, remote, server).await {
            Ok(pcid) => {
                tx.commit().await?;
                Ok(pcid)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("rollback after failed import failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn import_in(
        &self,
        tx: &mut (dyn Transaction + '_),
        schema: &str,
        remote: &str,
        server: &str,
    ) -> Result<i32> {
        let create = SqlTemplate::utility("schema.create", CREATE_SCHEMA_SQL)
            .ident("schema", schema)
            .build()?;
        tx.execute(&create).await?;

        let pcid = self.allocator().peek_next(tx).await?;
        let mut options = OptionMap::new();
        options.insert(PCID_OPTION, pcid.to_string())?;

        tx.execute(&import_statement(
            "schema.import_registry",
            IMPORT_REGISTRY_SQL,
            remote,
            server,
            schema,
            &options,
        )?)
        .await?;

        let imported = QualifiedName::new(schema, REGISTRY_RELATION)?;
        let copy = SqlTemplate::query("schema.copy_registry", COPY_REGISTRY_SQL)
            .qualified("registry", &self.registry)
            .qualified("imported", &imported)
            .build()?;
        let copied = tx.execute(&copy).await?;
        debug!("Copied {} registry rows from {}", copied, imported);

        tx.execute(&import_statement(
            "schema.import_rest",
            IMPORT_REST_SQL,
            remote,
            server,
            schema,
            &options,
        )?)
        .await?;

        Ok(pcid)
    }

    // =========================================================================
    // Views
    // =========================================================================

    /// Materialize `schema.view` over `schema.table`.
    ///
    /// With `trajectory`, the view holds the canonical quaternion layout
    /// reprojected to `srid` (default from configuration) and registered in
    /// the format registry.
    pub async fn create_view(
        &self,
        view: &str,
        table: &str,
        trajectory: bool,
        srid: Option<i32>,
    ) -> Result<MaterializedView> {
        let view_name = QualifiedName::parse("view", view)?;
        let table_name = QualifiedName::parse("table", table)?;

        match (trajectory, srid) {
            (true, Some(srid)) if srid <= 0 => {
                return Err(ProvisionError::InvalidSrid {
                    srid,
                    reason: "trajectory views need a positive srid",
                })
            }
            (false, Some(srid)) => {
                return Err(ProvisionError::InconsistentOptions(format!(
                    "srid {} requires a trajectory view",
                    srid
                )))
            }
            _ => {}
        }

        if !self.engine.relation_exists(&table_name).await? {
            return Err(ProvisionError::ResourceNotFound {
                kind: "table",
                name: table_name.to_string(),
            });
        }

        let layout = if trajectory {
            let week = GpsWeek::from_table_name(&table_name.name)?;
            let srid = srid.unwrap_or(self.config.default_srid);
            let projection = self.projection(srid).await?;
            let allocation = self
                .allocator()
                .allocate(srid, &descriptor(projection))
                .await?;
            debug!(
                "Trajectory view {}: srid {} ({:?}), pcid {}, GPS week {}",
                view_name, srid, projection, allocation.pcid, week.week
            );
            ViewLayout::Trajectory {
                srid,
                pcid: allocation.pcid,
                week,
            }
        } else {
            ViewLayout::Raw
        };

        let statement = create_view_statement(&view_name, &table_name, &layout)?;
        self.run_atomic(&statement)
            .await
            .map_err(|e| exists_or(e, "view", &view_name.to_string()))?;
        info!("Created materialized view {} over {}", view_name, table_name);

        self.engine
            .read_views()
            .await?
            .into_iter()
            .find(|v| v.schema == view_name.schema && v.view == view_name.name)
            .ok_or_else(|| missing_after_create("view", &view_name))
    }

    async fn projection(&self, srid: i32) -> Result<Projection> {
        let rows = self
            .engine
            .query(&Projection::lookup_statement(srid)?)
            .await?;
        Projection::from_rows(srid, &rows)
    }

    async fn run_atomic(&self, statement: &Statement) -> Result<()> {
        let mut tx = self.engine.begin().await?;
        match tx.execute(statement).await {
            Ok(_) => tx.commit().await,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("rollback of {} failed: {}", statement.label(), rollback);
                }
                Err(e)
            }
        }
    }
}

fn import_statement(
    label: &'static str,
    template: &'static str,
    remote: &str,
    server: &str,
    schema: &str,
    options: &OptionMap,
) -> Result<Statement> {
    SqlTemplate::utility(label, template)
        .ident("remote", remote)
        .ident("server", server)
        .ident("schema", schema)
        .options("options", options)
        .build()
}

/// Map a duplicate-name engine error to [`ProvisionError::ResourceExists`].
fn exists_or(err: ProvisionError, kind: &str, name: &str) -> ProvisionError {
    if err.is_duplicate() {
        ProvisionError::ResourceExists(format!("{} {}", kind, name))
    } else {
        err
    }
}

fn missing_after_create(kind: &str, name: &QualifiedName) -> ProvisionError {
    ProvisionError::engine(format!("{} {} missing from catalog after creation", kind, name))
}
