//! li3ds-provision CLI - provision LI3DS foreign tables and views in PostgreSQL.

use clap::{Parser, Subcommand};
use li3ds_provision::{Api, Config, OptionMap, PgEngine, ProvisionError, Provisioner};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "li3ds-provision")]
#[command(about = "Provision multicorn foreign tables and pointcloud views for LI3DS acquisitions")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List drivers offered by the foreign-data wrapper
    Drivers,

    /// List foreign servers
    Servers,

    /// Create a foreign server bound to a driver
    CreateServer {
        /// Server name
        name: String,

        /// Driver class, e.g. fdwli3ds.Rosbag
        #[arg(long)]
        driver: String,

        /// Server option as key=value (repeatable)
        #[arg(short, long = "option", value_parser = parse_option)]
        options: Vec<(String, String)>,
    },

    /// List foreign tables
    Tables,

    /// Create a pcpatch foreign table on a server
    CreateTable {
        /// Table as schema.table
        table: String,

        /// Foreign server name
        #[arg(long)]
        server: String,

        /// Spatial reference of the table's points
        #[arg(long, default_value = "0")]
        srid: i32,

        /// Table option as key=value (repeatable)
        #[arg(short, long = "option", value_parser = parse_option)]
        options: Vec<(String, String)>,
    },

    /// Import a remote schema and its point formats
    ImportSchema {
        /// Local schema name
        schema: String,

        /// Remote schema name (the bag file for bag servers)
        #[arg(long, alias = "rosbag")]
        remote: String,

        /// Foreign server name
        #[arg(long)]
        server: String,
    },

    /// List materialized views
    Views,

    /// Create a materialized view over a table
    CreateView {
        /// View as schema.view
        view: String,

        /// Source table as schema.table
        #[arg(long)]
        table: String,

        /// Convert SBET samples to the quaternion trajectory layout
        #[arg(long)]
        trajectory: bool,

        /// Target srid of a trajectory view [default: provisioning.default_srid]
        #[arg(long)]
        srid: Option<i32>,
    },

    /// Test the database connection and driver enumeration
    HealthCheck,

    /// Send one request to the JSON API and print the response
    Request {
        /// HTTP-style method (GET, POST)
        method: String,

        /// Resource: drivers, server, table, schema, view
        resource: String,

        /// JSON request body
        #[arg(long, default_value = "{}")]
        body: String,
    },
}

#[derive(Serialize)]
struct HealthCheck {
    connected: bool,
    latency_ms: u128,
    drivers: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, ProvisionError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let started = Instant::now();
    let engine = Arc::new(PgEngine::connect(&config).await?);
    let latency_ms = started.elapsed().as_millis();
    let provisioner = Provisioner::new(engine.clone(), config.provisioning.clone())?;

    match cli.command {
        Commands::Drivers => print_json(&provisioner.list_drivers().await?)?,
        Commands::Servers => print_json(&provisioner.list_servers().await?)?,
        Commands::CreateServer {
            name,
            driver,
            options,
        } => {
            let options = option_map(options)?;
            print_json(&provisioner.create_server(&name, &driver, &options).await?)?;
        }
        Commands::Tables => print_json(&provisioner.list_tables().await?)?,
        Commands::CreateTable {
            table,
            server,
            srid,
            options,
        } => {
            let options = option_map(options)?;
            print_json(&provisioner.create_table(&table, &server, srid, &options).await?)?;
        }
        Commands::ImportSchema {
            schema,
            remote,
            server,
        } => print_json(&provisioner.import_schema(&schema, &remote, &server).await?)?,
        Commands::Views => print_json(&provisioner.list_views().await?)?,
        Commands::CreateView {
            view,
            table,
            trajectory,
            srid,
        } => print_json(&provisioner.create_view(&view, &table, trajectory, srid).await?)?,
        Commands::HealthCheck => {
            engine.test_connection().await?;
            let drivers = provisioner.list_drivers().await?;
            print_json(&HealthCheck {
                connected: true,
                latency_ms,
                drivers: drivers.len(),
            })?;
        }
        Commands::Request {
            method,
            resource,
            body,
        } => {
            let body: serde_json::Value = serde_json::from_str(&body)?;
            let response = Api::new(provisioner).handle(&method, &resource, &body).await;
            print_json(&response)?;
            if !response.is_success() {
                return Ok(ExitCode::from(status_exit_code(response.status)));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), ProvisionError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_option(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {:?}", raw)),
    }
}

fn option_map(pairs: Vec<(String, String)>) -> Result<OptionMap, ProvisionError> {
    let mut options = OptionMap::new();
    for (key, value) in pairs {
        options.insert(key, value)?;
    }
    Ok(options)
}

/// Exit code of a failed API response, aligned with the error exit codes.
fn status_exit_code(status: u16) -> u8 {
    match status {
        400 => 2,
        409 => 3,
        404 | 405 => 4,
        _ => 5,
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout carries command output
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
