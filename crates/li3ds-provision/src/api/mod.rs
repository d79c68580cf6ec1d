//! Request-level API.
//!
//! Transport-agnostic JSON handlers for the provisioning endpoints. Each
//! handler takes a request body, runs the matching [`Provisioner`] operation
//! and returns a status with a JSON body. Failures become
//! `{"message": ...}` bodies; engine diagnostics are replaced by a generic
//! message unless `expose_engine_errors` is configured.
//!
//! | Method | Resource | Body |
//! |---|---|---|
//! | `GET` | `drivers` | |
//! | `GET`/`POST` | `server` | [`ServerRequest`] |
//! | `GET`/`POST` | `table` | [`TableRequest`] |
//! | `POST` | `schema` | [`SchemaRequest`] |
//! | `GET`/`POST` | `view` | [`ViewRequest`] |

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::core::{ForeignServer, ForeignTable, MaterializedView, OptionMap};
use crate::error::{ProvisionError, Result};
use crate::provision::{ImportedSchema, Provisioner};

pub const STATUS_OK: u16 = 200;
pub const STATUS_CREATED: u16 = 201;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_METHOD_NOT_ALLOWED: u16 = 405;

/// `POST server`
#[derive(Debug, Clone, Deserialize)]
pub struct ServerRequest {
    pub name: String,
    pub driver: String,
    #[serde(default)]
    pub options: Value,
}

/// `POST table`
#[derive(Debug, Clone, Deserialize)]
pub struct TableRequest {
    /// `schema.table`
    pub table: String,
    pub server: String,
    #[serde(default)]
    pub srid: i32,
    #[serde(default)]
    pub options: Value,
}

/// `POST schema`
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaRequest {
    pub schema: String,
    /// Remote schema name; for bag servers, the bag file.
    #[serde(alias = "rosbag")]
    pub remote_name: String,
    pub server: String,
}

/// `POST view`
#[derive(Debug, Clone, Deserialize)]
pub struct ViewRequest {
    /// `schema.view`
    pub view: String,
    /// `schema.table`
    pub table: String,
    #[serde(default)]
    pub trajectory: bool,
    #[serde(default)]
    pub srid: Option<i32>,
}

/// Status and JSON body of a handled request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn message(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "message": message.into() }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// JSON handlers over a [`Provisioner`].
pub struct Api {
    provisioner: Provisioner,
}

impl Api {
    pub fn new(provisioner: Provisioner) -> Self {
        Self { provisioner }
    }

    /// Route `method resource` to its handler.
    ///
    /// Resources are matched without surrounding slashes and with an
    /// optional plural `s` (`/servers/` is `server`).
    pub async fn handle(&self, method: &str, resource: &str, body: &Value) -> ApiResponse {
        let resource = resource.trim_matches('/');
        let resource = resource.strip_suffix('s').unwrap_or(resource);
        let method = method.to_ascii_uppercase();

        match (method.as_str(), resource) {
            ("GET", "driver") => self.get_drivers().await,
            ("GET", "server") => self.get_servers().await,
            ("POST", "server") => self.post_server(body).await,
            ("GET", "table") => self.get_tables().await,
            ("POST", "table") => self.post_table(body).await,
            ("POST", "schema") => self.post_schema(body).await,
            ("GET", "view") => self.get_views().await,
            ("POST", "view") => self.post_view(body).await,
            (_, "driver" | "server" | "table" | "schema" | "view") => ApiResponse::message(
                STATUS_METHOD_NOT_ALLOWED,
                format!("{} is not allowed on {}", method, resource),
            ),
            _ => ApiResponse::message(STATUS_NOT_FOUND, format!("unknown resource {}", resource)),
        }
    }

    pub async fn get_drivers(&self) -> ApiResponse {
        self.respond("get drivers", STATUS_OK, self.provisioner.list_drivers().await)
    }

    pub async fn get_servers(&self) -> ApiResponse {
        self.respond("get servers", STATUS_OK, self.provisioner.list_servers().await)
    }

    pub async fn post_server(&self, body: &Value) -> ApiResponse {
        let result = self.create_server(body).await;
        self.respond("post server", STATUS_CREATED, result)
    }

    pub async fn get_tables(&self) -> ApiResponse {
        self.respond("get tables", STATUS_OK, self.provisioner.list_tables().await)
    }

    pub async fn post_table(&self, body: &Value) -> ApiResponse {
        let result = self.create_table(body).await;
        self.respond("post table", STATUS_CREATED, result)
    }

    pub async fn post_schema(&self, body: &Value) -> ApiResponse {
        let result = self.import_schema(body).await;
        self.respond("post schema", STATUS_CREATED, result)
    }

    pub async fn get_views(&self) -> ApiResponse {
        self.respond("get views", STATUS_OK, self.provisioner.list_views().await)
    }

    pub async fn post_view(&self, body: &Value) -> ApiResponse {
        let result = self.create_view(body).await;
        self.respond("post view", STATUS_CREATED, result)
    }

    async fn create_server(&self, body: &Value) -> Result<ForeignServer> {
        let request: ServerRequest = parse(body)?;
        let options = OptionMap::from_json(&request.options)?;
        self.provisioner
            .create_server(&request.name, &request.driver, &options)
            .await
    }

    async fn create_table(&self, body: &Value) -> Result<ForeignTable> {
        let request: TableRequest = parse(body)?;
        let options = OptionMap::from_json(&request.options)?;
        self.provisioner
            .create_table(&request.table, &request.server, request.srid, &options)
            .await
    }

    async fn import_schema(&self, body: &Value) -> Result<ImportedSchema> {
        let request: SchemaRequest = parse(body)?;
        self.provisioner
            .import_schema(&request.schema, &request.remote_name, &request.server)
            .await
    }

    async fn create_view(&self, body: &Value) -> Result<MaterializedView> {
        let request: ViewRequest = parse(body)?;
        self.provisioner
            .create_view(&request.view, &request.table, request.trajectory, request.srid)
            .await
    }

    fn respond<T: Serialize>(&self, operation: &str, status: u16, result: Result<T>) -> ApiResponse {
        let err = match result.and_then(|value| Ok(serde_json::to_value(value)?)) {
            Ok(body) => return ApiResponse { status, body },
            Err(err) => err,
        };

        let status = err.status_code();
        if status >= 500 {
            error!("{} failed: {}", operation, err.format_detailed());
        } else {
            debug!("{} rejected ({}): {}", operation, status, err);
        }
        let expose = self.provisioner.config().expose_engine_errors;
        ApiResponse::message(status, err.public_message(expose))
    }
}

fn parse<T: DeserializeOwned>(body: &Value) -> Result<T> {
    serde_json::from_value(body.clone()).map_err(ProvisionError::from)
}
