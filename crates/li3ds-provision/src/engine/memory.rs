//! In-memory engine for tests.
//!
//! Statements are interpreted by label and named bindings, not by parsing
//! SQL. The engine keeps servers, foreign tables, views, plain relations and
//! the format registry; a transaction stages its changes and applies them on
//! commit. `registry.lock` holds an async mutex until the transaction ends,
//! mirroring the table lock taken by the allocator.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::core::{
    Bind, Engine, ForeignServer, ForeignTable, MaterializedView, OptionMap, QualifiedName, Row,
    SqlValue, Statement, StatementKind, Transaction,
};
use crate::drivers::{PCID_OPTION, WRAPPER_OPTION};
use crate::error::{
    ProvisionError, Result, SQLSTATE_DUPLICATE_OBJECT, SQLSTATE_DUPLICATE_TABLE,
    SQLSTATE_UNIQUE_VIOLATION,
};

const SQLSTATE_UNDEFINED_TABLE: &str = "42P01";
const REMOTE_REGISTRY: &str = "pointcloud_formats";

#[derive(Debug, Clone, Default)]
struct State {
    drivers: BTreeSet<String>,
    servers: Vec<ForeignServer>,
    tables: Vec<ForeignTable>,
    views: Vec<MaterializedView>,
    relations: BTreeSet<QualifiedName>,
    schemas: BTreeSet<String>,
    registry: BTreeMap<i32, (i32, String)>,
    /// `spatial_ref_sys`: srid -> uses longitude/latitude.
    reference_systems: BTreeMap<i32, bool>,
}

/// Reference systems known to a fresh engine.
const REFERENCE_SYSTEMS: [(i32, bool); 5] = [
    (4326, true),
    (4258, true),
    (4171, true),
    (2154, false),
    (32631, false),
];

#[derive(Debug, Clone)]
enum Change {
    Server(ForeignServer),
    Table(ForeignTable),
    View(MaterializedView),
    Relation(QualifiedName),
    DropRelation(QualifiedName),
    Schema(String),
    Registry { pcid: i32, srid: i32, descriptor: String },
}

impl State {
    fn apply(&mut self, change: Change) -> Result<()> {
        match change {
            Change::Server(server) => self.servers.push(server),
            Change::Table(table) => {
                self.relations
                    .insert(QualifiedName::new(table.schema.clone(), table.table.clone())?);
                self.tables.push(table);
            }
            Change::View(view) => {
                self.relations
                    .insert(QualifiedName::new(view.schema.clone(), view.view.clone())?);
                self.views.push(view);
            }
            Change::Relation(name) => {
                self.relations.insert(name);
            }
            Change::DropRelation(name) => {
                self.relations.remove(&name);
            }
            Change::Schema(schema) => {
                self.schemas.insert(schema);
            }
            Change::Registry {
                pcid,
                srid,
                descriptor,
            } => {
                if self.registry.contains_key(&pcid) {
                    return Err(sql_error(
                        SQLSTATE_UNIQUE_VIOLATION,
                        format!("duplicate key value violates unique constraint (pcid)=({})", pcid),
                    ));
                }
                self.registry.insert(pcid, (srid, descriptor));
            }
        }
        Ok(())
    }

    fn next_pcid(&self) -> i32 {
        self.registry.keys().next_back().copied().unwrap_or(0) + 1
    }
}

/// Remote content returned by `IMPORT FOREIGN SCHEMA`.
#[derive(Debug, Clone, Default)]
pub struct RemoteSchema {
    /// Rows of the remote `pointcloud_formats`: (pcid, srid, descriptor).
    pub registry: Vec<(i32, i32, String)>,
    /// Relations other than the registry.
    pub tables: Vec<String>,
}

#[derive(Debug, Default)]
struct Controls {
    failures: HashMap<&'static str, (Option<String>, String)>,
    conflicts: u32,
    probe_descriptor: String,
    remote: RemoteSchema,
    executed: Vec<&'static str>,
    ddl_count: usize,
}

/// Engine double backed by process memory.
pub struct MemoryEngine {
    state: Mutex<State>,
    controls: Mutex<Controls>,
    registry_lock: Arc<AsyncMutex<()>>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                reference_systems: REFERENCE_SYSTEMS.into_iter().collect(),
                ..State::default()
            }),
            controls: Mutex::new(Controls {
                probe_descriptor: "<pc:PointCloudSchema/>".to_string(),
                ..Controls::default()
            }),
            registry_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn controls(&self) -> MutexGuard<'_, Controls> {
        self.controls.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_drivers(self, drivers: &[&str]) -> Self {
        self.state().drivers = drivers.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_server(self, name: &str, driver: &str) -> Self {
        self.state().servers.push(ForeignServer {
            name: name.to_string(),
            driver: driver.to_string(),
            options: OptionMap::new(),
        });
        self
    }

    pub fn with_relation(self, schema: &str, name: &str) -> Self {
        if let Ok(name) = QualifiedName::new(schema, name) {
            self.state().relations.insert(name);
        }
        self
    }

    pub fn with_registry_row(self, pcid: i32, srid: i32, descriptor: &str) -> Self {
        self.state()
            .registry
            .insert(pcid, (srid, descriptor.to_string()));
        self
    }

    pub fn with_probe_descriptor(self, descriptor: &str) -> Self {
        self.controls().probe_descriptor = descriptor.to_string();
        self
    }

    pub fn with_remote_schema(self, remote: RemoteSchema) -> Self {
        self.controls().remote = remote;
        self
    }

    /// Fail every statement with this label.
    pub fn fail_on(&self, label: &'static str, sqlstate: Option<&str>) {
        self.controls().failures.insert(
            label,
            (
                sqlstate.map(str::to_string),
                format!("injected failure on {}", label),
            ),
        );
    }

    /// Make the next `count` registry inserts raise a unique violation.
    pub fn inject_conflicts(&self, count: u32) {
        self.controls().conflicts = count;
    }

    /// Utility statements executed so far.
    pub fn ddl_count(&self) -> usize {
        self.controls().ddl_count
    }

    /// Labels of every statement submitted, in order.
    pub fn executed(&self) -> Vec<&'static str> {
        self.controls().executed.clone()
    }

    pub fn registry(&self) -> BTreeMap<i32, (i32, String)> {
        self.state().registry.clone()
    }

    pub fn has_relation(&self, schema: &str, name: &str) -> bool {
        QualifiedName::new(schema, name)
            .map(|name| self.state().relations.contains(&name))
            .unwrap_or(false)
    }

    /// Interpret one statement against the committed state plus `staged`.
    fn interpret(&self, statement: &Statement, staged: &[Change]) -> Result<(Vec<Change>, Vec<Row>)> {
        {
            let mut controls = self.controls();
            controls.executed.push(statement.label());
            if statement.kind() == StatementKind::Utility {
                controls.ddl_count += 1;
            }
            if let Some((sqlstate, message)) = controls.failures.get(statement.label()) {
                return Err(ProvisionError::Engine {
                    sqlstate: sqlstate.clone(),
                    message: message.clone(),
                });
            }
        }
        // Reject anything the real engine could not render.
        statement.to_inline_sql()?;

        let mut visible = self.state().clone();
        for change in staged {
            visible.apply(change.clone())?;
        }

        let mut changes = Vec::new();
        let mut rows = Vec::new();

        match statement.label() {
            "server.create" => {
                let name = ident(statement, "name")?;
                if visible.servers.iter().any(|s| s.name == name) {
                    return Err(sql_error(
                        SQLSTATE_DUPLICATE_OBJECT,
                        format!("server \"{}\" already exists", name),
                    ));
                }
                let options = options(statement, "options")?;
                let driver = options.get(WRAPPER_OPTION).unwrap_or_default().to_string();
                changes.push(Change::Server(ForeignServer {
                    name,
                    driver,
                    options: without(&options, WRAPPER_OPTION),
                }));
            }
            "table.probe.create" => {
                let table = qualified(statement, "table")?;
                ensure_absent(&visible, &table)?;
                changes.push(Change::Relation(table));
            }
            "table.probe.read" => {
                let table = qualified(statement, "table")?;
                ensure_present(&visible, &table)?;
                let descriptor = self.controls().probe_descriptor.clone();
                rows.push(Row::new(vec![("schema".into(), SqlValue::Text(descriptor))]));
            }
            "table.probe.drop" => {
                let table = qualified(statement, "table")?;
                ensure_present(&visible, &table)?;
                changes.push(Change::DropRelation(table));
            }
            "table.create" => {
                let table = qualified(statement, "table")?;
                ensure_absent(&visible, &table)?;
                let pcid = match statement.binding("pcid") {
                    Some(Bind::Integer(pcid)) => *pcid as i32,
                    _ => return Err(missing_binding(statement, "pcid")),
                };
                let options = options(statement, "options")?;
                changes.push(Change::Table(ForeignTable {
                    schema: table.schema,
                    table: table.name,
                    server: ident(statement, "server")?,
                    pcid: Some(pcid),
                    srid: visible.registry.get(&pcid).map(|(srid, _)| *srid),
                    options: without(&options, PCID_OPTION),
                }));
            }
            "registry.lock" => {}
            "registry.lookup" => {
                let srid = int_value(statement, "srid")?;
                let descriptor = text_value(statement, "descriptor")?;
                rows.extend(
                    visible
                        .registry
                        .iter()
                        .filter(|(_, (s, d))| *s == srid && *d == descriptor)
                        .map(|(pcid, _)| pcid_row(*pcid)),
                );
            }
            "registry.next" => rows.push(pcid_row(visible.next_pcid())),
            "registry.insert" => {
                {
                    let mut controls = self.controls();
                    if controls.conflicts > 0 {
                        controls.conflicts -= 1;
                        return Err(sql_error(
                            SQLSTATE_UNIQUE_VIOLATION,
                            "duplicate key value violates unique constraint".to_string(),
                        ));
                    }
                }
                let pcid = visible.next_pcid();
                changes.push(Change::Registry {
                    pcid,
                    srid: int_value(statement, "srid")?,
                    descriptor: text_value(statement, "descriptor")?,
                });
                rows.push(pcid_row(pcid));
            }
            "srs.kind" => {
                let srid = int_value(statement, "srid")?;
                if let Some(geographic) = visible.reference_systems.get(&srid) {
                    rows.push(Row::new(vec![(
                        "geographic".into(),
                        SqlValue::Bool(*geographic),
                    )]));
                }
            }
            "schema.create" => changes.push(Change::Schema(ident(statement, "schema")?)),
            "schema.import_registry" => {
                let schema = ident(statement, "schema")?;
                let imported = QualifiedName::new(schema, REMOTE_REGISTRY)?;
                ensure_absent(&visible, &imported)?;
                changes.push(Change::Relation(imported));
            }
            "schema.copy_registry" => {
                let remote = self.controls().remote.registry.clone();
                for (pcid, srid, descriptor) in remote {
                    changes.push(Change::Registry {
                        pcid,
                        srid,
                        descriptor,
                    });
                }
            }
            "schema.import_rest" => {
                let schema = ident(statement, "schema")?;
                let server = ident(statement, "server")?;
                let options = options(statement, "options")?;
                let pcid = options.get(PCID_OPTION).and_then(|p| p.parse().ok());
                for table in self.controls().remote.tables.clone() {
                    ensure_absent(&visible, &QualifiedName::new(schema.clone(), table.clone())?)?;
                    changes.push(Change::Table(ForeignTable {
                        schema: schema.clone(),
                        table,
                        server: server.clone(),
                        pcid,
                        srid: None,
                        options: OptionMap::new(),
                    }));
                }
            }
            "view.create" => {
                let view = qualified(statement, "view")?;
                ensure_absent(&visible, &view)?;
                let source = qualified(statement, "table")?;
                ensure_present(&visible, &source)?;
                changes.push(Change::View(MaterializedView {
                    schema: view.schema,
                    view: view.name,
                    definition: statement.to_inline_sql()?,
                }));
            }
            other => {
                return Err(ProvisionError::engine(format!(
                    "memory engine cannot interpret '{}'",
                    other
                )))
            }
        }

        // Validate the changes against the visible state before accepting.
        for change in &changes {
            visible.apply(change.clone())?;
        }

        Ok((changes, rows))
    }

    fn commit_changes(&self, changes: Vec<Change>) -> Result<()> {
        let mut state = self.state();
        let mut next = state.clone();
        for change in changes {
            next.apply(change)?;
        }
        *state = next;
        Ok(())
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn execute(&self, statement: &Statement) -> Result<u64> {
        tokio::task::yield_now().await;
        let (changes, rows) = self.interpret(statement, &[])?;
        let count = changes.len().max(rows.len()) as u64;
        self.commit_changes(changes)?;
        Ok(count)
    }

    async fn query(&self, statement: &Statement) -> Result<Vec<Row>> {
        tokio::task::yield_now().await;
        let (changes, rows) = self.interpret(statement, &[])?;
        self.commit_changes(changes)?;
        Ok(rows)
    }

    async fn enumerate_drivers(&self) -> Result<BTreeSet<String>> {
        Ok(self.state().drivers.clone())
    }

    async fn read_servers(&self) -> Result<Vec<ForeignServer>> {
        Ok(self.state().servers.clone())
    }

    async fn read_tables(&self) -> Result<Vec<ForeignTable>> {
        Ok(self.state().tables.clone())
    }

    async fn read_views(&self) -> Result<Vec<MaterializedView>> {
        Ok(self.state().views.clone())
    }

    async fn relation_exists(&self, name: &QualifiedName) -> Result<bool> {
        Ok(self.state().relations.contains(name))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        Ok(Box::new(MemoryTransaction {
            engine: self,
            staged: Vec::new(),
            lock: None,
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct MemoryTransaction<'a> {
    engine: &'a MemoryEngine,
    staged: Vec<Change>,
    lock: Option<OwnedMutexGuard<()>>,
}

impl MemoryTransaction<'_> {
    async fn run(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        if statement.label() == "registry.lock" && self.lock.is_none() {
            self.lock = Some(self.engine.registry_lock.clone().lock_owned().await);
        }
        tokio::task::yield_now().await;
        let (changes, rows) = self.engine.interpret(statement, &self.staged)?;
        self.staged.extend(changes);
        Ok(rows)
    }
}

#[async_trait]
impl Transaction for MemoryTransaction<'_> {
    async fn execute(&mut self, statement: &Statement) -> Result<u64> {
        Ok(self.run(statement).await?.len() as u64)
    }

    async fn query(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        self.run(statement).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { engine, staged, .. } = *self;
        engine.commit_changes(staged)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn sql_error(sqlstate: &str, message: String) -> ProvisionError {
    ProvisionError::Engine {
        sqlstate: Some(sqlstate.to_string()),
        message,
    }
}

fn ensure_absent(state: &State, name: &QualifiedName) -> Result<()> {
    if state.relations.contains(name) {
        return Err(sql_error(
            SQLSTATE_DUPLICATE_TABLE,
            format!("relation \"{}\" already exists", name),
        ));
    }
    Ok(())
}

fn ensure_present(state: &State, name: &QualifiedName) -> Result<()> {
    if !state.relations.contains(name) {
        return Err(sql_error(
            SQLSTATE_UNDEFINED_TABLE,
            format!("relation \"{}\" does not exist", name),
        ));
    }
    Ok(())
}

fn missing_binding(statement: &Statement, name: &str) -> ProvisionError {
    ProvisionError::engine(format!("{} has no usable {{{}}}", statement.label(), name))
}

fn ident(statement: &Statement, name: &str) -> Result<String> {
    match statement.binding(name) {
        Some(Bind::Ident(ident)) => Ok(ident.clone()),
        _ => Err(missing_binding(statement, name)),
    }
}

fn qualified(statement: &Statement, name: &str) -> Result<QualifiedName> {
    match statement.binding(name) {
        Some(Bind::Qualified(qualified)) => Ok(qualified.clone()),
        _ => Err(missing_binding(statement, name)),
    }
}

fn options(statement: &Statement, name: &str) -> Result<OptionMap> {
    match statement.binding(name) {
        Some(Bind::Options(options)) => Ok(options.clone()),
        _ => Err(missing_binding(statement, name)),
    }
}

fn int_value(statement: &Statement, name: &str) -> Result<i32> {
    match statement.binding(name) {
        Some(Bind::Value(value)) => value
            .as_i64()
            .map(|v| v as i32)
            .ok_or_else(|| missing_binding(statement, name)),
        _ => Err(missing_binding(statement, name)),
    }
}

fn text_value(statement: &Statement, name: &str) -> Result<String> {
    match statement.binding(name) {
        Some(Bind::Value(SqlValue::Text(text))) => Ok(text.clone()),
        _ => Err(missing_binding(statement, name)),
    }
}

fn without(options: &OptionMap, key: &str) -> OptionMap {
    options.iter().filter(|(k, _)| *k != key).collect()
}

fn pcid_row(pcid: i32) -> Row {
    Row::new(vec![("pcid".into(), SqlValue::Int(pcid))])
}
