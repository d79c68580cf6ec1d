//! PostgreSQL engine.
//!
//! Uses deadpool-postgres for connection pooling. Utility statements run over
//! the simple query protocol with literals inlined; everything else is bound.
//! TLS goes through rustls with the ring provider; the same connector serves
//! the pool and the dedicated driver-enumeration connection.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::StreamExt;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_postgres::{AsyncMessage, Client, Config as PgConfig, Connection, SimpleQueryMessage};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::{
    Engine, ForeignServer, ForeignTable, MaterializedView, OptionMap, QualifiedName, Row,
    SqlTemplate, SqlValue, Statement, StatementKind, Transaction,
};
use crate::drivers::{PCID_OPTION, WRAPPER_OPTION};
use crate::error::{ProvisionError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Lists every multicorn wrapper class of the `fdwli3ds` package as one
/// comma-separated NOTICE.
const DRIVER_ENUMERATION: &str = "DO $$
import inspect
import fdwli3ds
from multicorn import ForeignDataWrapper
plpy.notice(','.join(sorted(
    'fdwli3ds.' + name
    for name, cls in inspect.getmembers(
        fdwli3ds,
        lambda x: inspect.isclass(x) and ForeignDataWrapper in x.mro()[1:])
)))
$$ LANGUAGE {language}";

const SERVERS_SQL: &str = "SELECT s.srvname::text AS name,
       o.option_name::text AS key,
       o.option_value::text AS value
FROM pg_catalog.pg_foreign_server s
JOIN pg_catalog.pg_foreign_data_wrapper w ON w.oid = s.srvfdw
LEFT JOIN LATERAL pg_catalog.pg_options_to_table(s.srvoptions) o ON true
WHERE w.fdwname = {fdw}::text
ORDER BY 1, 2";

const TABLES_SQL: &str = "SELECT n.nspname::text AS schema,
       c.relname::text AS \"table\",
       s.srvname::text AS server,
       o.option_name::text AS key,
       o.option_value::text AS value
FROM pg_catalog.pg_foreign_table ft
JOIN pg_catalog.pg_class c ON c.oid = ft.ftrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
JOIN pg_catalog.pg_foreign_server s ON s.oid = ft.ftserver
JOIN pg_catalog.pg_foreign_data_wrapper w ON w.oid = s.srvfdw
LEFT JOIN LATERAL pg_catalog.pg_options_to_table(ft.ftoptions) o ON true
WHERE w.fdwname = {fdw}::text
ORDER BY 1, 2, 4";

const VIEWS_SQL: &str = "SELECT schemaname::text AS schema,
       matviewname::text AS view,
       definition
FROM pg_catalog.pg_matviews
ORDER BY 1, 2";

const REGISTRY_SRIDS_SQL: &str = "SELECT pcid, srid FROM {registry}";

const RELATION_EXISTS_SQL: &str = "SELECT EXISTS (
    SELECT 1
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = {schema}::text AND c.relname = {name}::text
) AS present";

/// Transport security of engine connections, from `database.ssl_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslMode {
    Disable,
    /// Encrypted; the server certificate chain is not checked.
    Require,
    /// Chain and hostname checked against the web PKI roots. `verify-ca`
    /// lands here as rustls has no chain-only mode.
    VerifyFull,
}

impl FromStr for SslMode {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "disable" => Ok(SslMode::Disable),
            "require" => Ok(SslMode::Require),
            "verify-ca" | "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(ProvisionError::Config(format!(
                "database.ssl_mode {:?} is not one of disable, require, verify-ca, verify-full",
                other
            ))),
        }
    }
}

/// rustls connector for `mode`, `None` for plain TCP.
fn tls_connector(mode: SslMode) -> Result<Option<MakeRustlsConnect>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let algorithms = provider.signature_verification_algorithms;
    let builder = match mode {
        SslMode::Disable => return Ok(None),
        SslMode::Require | SslMode::VerifyFull => ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ProvisionError::Config(format!("TLS setup failed: {}", e)))?,
    };
    let config = if mode == SslMode::Require {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(UncheckedChain(algorithms)))
            .with_no_client_auth()
    } else {
        let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(Some(MakeRustlsConnect::new(config)))
}

/// `ssl_mode=require`: any certificate chain is accepted, handshake
/// signatures are still verified.
#[derive(Debug)]
struct UncheckedChain(WebPkiSupportedAlgorithms);

impl ServerCertVerifier for UncheckedChain {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.supported_schemes()
    }
}

/// PostgreSQL engine over a deadpool connection pool.
pub struct PgEngine {
    pool: Pool,
    pg_config: PgConfig,
    tls: Option<MakeRustlsConnect>,
    fdw: String,
    registry: QualifiedName,
    driver_language: String,
}

impl PgEngine {
    /// Create the pool and check connectivity.
    pub async fn connect(config: &Config) -> Result<Self> {
        let db = &config.database;
        let mut pg_config = PgConfig::new();
        pg_config.host(&db.host);
        pg_config.port(db.port);
        pg_config.dbname(&db.database);
        pg_config.user(&db.user);
        pg_config.password(&db.password);
        pg_config.application_name("li3ds-provision");

        // Connection options for reliability
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let ssl_mode: SslMode = db.ssl_mode.parse()?;
        match ssl_mode {
            SslMode::Disable => {
                warn!("PostgreSQL TLS is disabled; credentials travel in plaintext")
            }
            SslMode::Require => warn!("ssl_mode=require: server certificate is not verified"),
            SslMode::VerifyFull => debug!("TLS with certificate verification"),
        }
        let tls = tls_connector(ssl_mode)?;
        let mgr = match &tls {
            None => Manager::from_config(pg_config.clone(), tokio_postgres::NoTls, mgr_config),
            Some(connector) => Manager::from_config(pg_config.clone(), connector.clone(), mgr_config),
        };
        let pool = Pool::builder(mgr)
            .max_size(db.max_connections)
            .build()
            .map_err(|e| ProvisionError::pool(e, "creating PostgreSQL pool"))?;

        let engine = Self {
            pool,
            pg_config,
            tls,
            fdw: config.provisioning.fdw.clone(),
            registry: config.provisioning.registry()?,
            driver_language: config.provisioning.driver_language.clone(),
        };
        engine.test_connection().await?;

        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            db.host, db.port, db.database
        );

        Ok(engine)
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Round-trip a trivial query on a pooled connection.
    pub async fn test_connection(&self) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| ProvisionError::pool(e, "testing PostgreSQL connection"))?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    /// Run `sql` on a dedicated connection and return the NOTICE messages it
    /// raised. Pooled connections hide their notices, hence the extra
    /// connection.
    async fn notices(&self, sql: &str) -> Result<Vec<String>> {
        match &self.tls {
            None => {
                let (client, connection) = self.pg_config.connect(tokio_postgres::NoTls).await?;
                collect_notices(client, connection, sql).await
            }
            Some(connector) => {
                let (client, connection) = self.pg_config.connect(connector.clone()).await?;
                collect_notices(client, connection, sql).await
            }
        }
    }

    async fn registry_srids(&self) -> Result<BTreeMap<i64, i32>> {
        let statement = SqlTemplate::query("registry.srids", REGISTRY_SRIDS_SQL)
            .qualified("registry", &self.registry)
            .build()?;
        let mut srids = BTreeMap::new();
        for row in self.query(&statement).await? {
            if let (Some(pcid), Some(srid)) = (
                row.get("pcid").and_then(SqlValue::as_i64),
                row.get("srid").and_then(SqlValue::as_i64),
            ) {
                srids.insert(pcid, registry_srid(pcid, srid)?);
            }
        }
        Ok(srids)
    }
}

#[async_trait]
impl Engine for PgEngine {
    async fn execute(&self, statement: &Statement) -> Result<u64> {
        let client = self.pool.get().await?;
        execute_on(&client, statement).await
    }

    async fn query(&self, statement: &Statement) -> Result<Vec<Row>> {
        let client = self.pool.get().await?;
        query_on(&client, statement).await
    }

    async fn enumerate_drivers(&self) -> Result<BTreeSet<String>> {
        let statement = SqlTemplate::utility("drivers.enumerate", DRIVER_ENUMERATION)
            .ident("language", self.driver_language.clone())
            .build()?;
        let notices = self.notices(&statement.to_inline_sql()?).await?;
        let last = notices.last().ok_or_else(|| {
            ProvisionError::engine("driver enumeration raised no notice")
        })?;
        Ok(parse_driver_notice(last))
    }

    async fn read_servers(&self) -> Result<Vec<ForeignServer>> {
        let statement = SqlTemplate::query("catalog.servers", SERVERS_SQL)
            .value("fdw", self.fdw.clone())
            .build()?;
        let rows = self.query(&statement).await?;

        let mut servers: Vec<ForeignServer> = Vec::new();
        for row in &rows {
            let name = text(row, "name")?;
            if servers.last().map(|s| s.name != name).unwrap_or(true) {
                servers.push(ForeignServer {
                    name,
                    driver: String::new(),
                    options: OptionMap::new(),
                });
            }
            let Some(server) = servers.last_mut() else {
                continue;
            };
            if let (Some(key), Some(value)) = (optional_text(row, "key"), optional_text(row, "value")) {
                if key == WRAPPER_OPTION {
                    server.driver = value;
                } else {
                    server.options.insert(key, value)?;
                }
            }
        }
        Ok(servers)
    }

    async fn read_tables(&self) -> Result<Vec<ForeignTable>> {
        let statement = SqlTemplate::query("catalog.tables", TABLES_SQL)
            .value("fdw", self.fdw.clone())
            .build()?;
        let rows = self.query(&statement).await?;
        let srids = self.registry_srids().await?;

        let mut tables: Vec<ForeignTable> = Vec::new();
        for row in &rows {
            let schema = text(row, "schema")?;
            let table = text(row, "table")?;
            let is_new = tables
                .last()
                .map(|t| t.schema != schema || t.table != table)
                .unwrap_or(true);
            if is_new {
                tables.push(ForeignTable {
                    schema,
                    table,
                    server: text(row, "server")?,
                    pcid: None,
                    srid: None,
                    options: OptionMap::new(),
                });
            }
            let Some(entry) = tables.last_mut() else {
                continue;
            };
            if let (Some(key), Some(value)) = (optional_text(row, "key"), optional_text(row, "value")) {
                if key == PCID_OPTION {
                    entry.pcid = value.trim().parse().ok();
                    entry.srid = entry.pcid.and_then(|pcid| srids.get(&i64::from(pcid)).copied());
                } else {
                    entry.options.insert(key, value)?;
                }
            }
        }
        Ok(tables)
    }

    async fn read_views(&self) -> Result<Vec<MaterializedView>> {
        let statement = SqlTemplate::query("catalog.views", VIEWS_SQL).build()?;
        self.query(&statement)
            .await?
            .iter()
            .map(|row| {
                Ok(MaterializedView {
                    schema: text(row, "schema")?,
                    view: text(row, "view")?,
                    definition: text(row, "definition")?,
                })
            })
            .collect()
    }

    async fn relation_exists(&self, name: &QualifiedName) -> Result<bool> {
        let statement = SqlTemplate::query("catalog.relation_exists", RELATION_EXISTS_SQL)
            .value("schema", name.schema.clone())
            .value("name", name.name.clone())
            .build()?;
        let rows = self.query(&statement).await?;
        Ok(matches!(
            rows.first().and_then(|row| row.get("present")),
            Some(SqlValue::Bool(true))
        ))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        let client = self.pool.get().await?;
        client.batch_execute("BEGIN").await?;
        Ok(Box::new(PgTransaction {
            client: Some(client),
        }))
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

/// Transaction pinned to one pooled connection.
///
/// Dropping it while open detaches the connection from the pool; closing the
/// connection makes the server roll the transaction back.
pub struct PgTransaction {
    client: Option<Object>,
}

impl PgTransaction {
    fn client(&self) -> Result<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| ProvisionError::engine("transaction already finished"))
    }

    async fn finish(mut self: Box<Self>, command: &str) -> Result<()> {
        let client = self
            .client
            .take()
            .ok_or_else(|| ProvisionError::engine("transaction already finished"))?;
        match client.batch_execute(command).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Do not hand a connection in an unknown state back to the pool.
                let _ = Object::take(client);
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<u64> {
        execute_on(self.client()?, statement).await
    }

    async fn query(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        query_on(self.client()?, statement).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            warn!("transaction dropped while open; discarding its connection");
            let _ = Object::take(client);
        }
    }
}

async fn execute_on(client: &Client, statement: &Statement) -> Result<u64> {
    debug!("{}: {}", statement.label(), statement);
    match statement.kind() {
        StatementKind::Utility => {
            client.batch_execute(&statement.to_inline_sql()?).await?;
            Ok(0)
        }
        StatementKind::Query => {
            let params: Vec<_> = statement.params().iter().map(SqlValue::as_to_sql).collect();
            Ok(client.execute(statement.to_sql().as_str(), &params).await?)
        }
    }
}

async fn query_on(client: &Client, statement: &Statement) -> Result<Vec<Row>> {
    debug!("{}: {}", statement.label(), statement);
    match statement.kind() {
        StatementKind::Utility => {
            let messages = client.simple_query(&statement.to_inline_sql()?).await?;
            Ok(messages.iter().filter_map(convert_simple_row).collect())
        }
        StatementKind::Query => {
            let params: Vec<_> = statement.params().iter().map(SqlValue::as_to_sql).collect();
            client
                .query(statement.to_sql().as_str(), &params)
                .await?
                .iter()
                .map(convert_row)
                .collect()
        }
    }
}

/// Drive a connection until its client is gone, collecting NOTICE messages.
async fn collect_notices<S, T>(
    client: Client,
    mut connection: Connection<S, T>,
    sql: &str,
) -> Result<Vec<String>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let listener = tokio::spawn(async move {
        let mut notices = Vec::new();
        let mut messages = futures::stream::poll_fn(move |cx| connection.poll_message(cx));
        while let Some(message) = messages.next().await {
            if let AsyncMessage::Notice(notice) = message? {
                notices.push(notice.message().to_string());
            }
        }
        Ok::<_, tokio_postgres::Error>(notices)
    });

    let executed = client.batch_execute(sql).await;
    drop(client);

    let notices = listener
        .await
        .map_err(|e| ProvisionError::engine(format!("notice listener failed: {}", e)))??;
    executed?;
    Ok(notices)
}

fn registry_srid(pcid: i64, srid: i64) -> Result<i32> {
    i32::try_from(srid).map_err(|_| {
        ProvisionError::engine(format!("registry srid {} of pcid {} out of range", srid, pcid))
    })
}

fn parse_driver_notice(notice: &str) -> BTreeSet<String> {
    notice
        .trim()
        .trim_start_matches("NOTICE:")
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Convert a PostgreSQL row using each column's type name.
fn convert_row(row: &tokio_postgres::Row) -> Result<Row> {
    let mut columns = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match column.type_().name() {
            "bool" => row.try_get::<_, Option<bool>>(idx)?.map(SqlValue::Bool),
            "int2" => row
                .try_get::<_, Option<i16>>(idx)?
                .map(|v| SqlValue::Int(i32::from(v))),
            "int4" => row.try_get::<_, Option<i32>>(idx)?.map(SqlValue::Int),
            "int8" => row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::BigInt),
            "float4" => row
                .try_get::<_, Option<f32>>(idx)?
                .map(|v| SqlValue::Float(f64::from(v))),
            "float8" => row.try_get::<_, Option<f64>>(idx)?.map(SqlValue::Float),
            _ => row.try_get::<_, Option<String>>(idx)?.map(SqlValue::Text),
        };
        columns.push((column.name().to_string(), value.unwrap_or(SqlValue::Null)));
    }
    Ok(Row::new(columns))
}

fn convert_simple_row(message: &SimpleQueryMessage) -> Option<Row> {
    let SimpleQueryMessage::Row(row) = message else {
        return None;
    };
    let columns = row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = row
                .get(idx)
                .map(|v| SqlValue::Text(v.to_string()))
                .unwrap_or(SqlValue::Null);
            (column.name().to_string(), value)
        })
        .collect();
    Some(Row::new(columns))
}

fn optional_text(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(SqlValue::as_text)
}

fn text(row: &Row, column: &str) -> Result<String> {
    optional_text(row, column)
        .ok_or_else(|| ProvisionError::engine(format!("catalog row without {}", column)))
}
