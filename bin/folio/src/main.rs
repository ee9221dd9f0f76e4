//! Folio - keyset-paginated GraphQL over a PostgreSQL table.
//!
//! # Usage
//!
//! ```bash
//! # Serve the `records` table with default config
//! folio --table records
//!
//! # Start with environment overrides
//! DATABASE_URL=postgres://localhost/folio FOLIO_TABLE=public.tracks folio
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};
use tracing_subscriber::{EnvFilter, fmt};

use folio_core::metrics::init_metrics;
use folio_core::query::Source;
use folio_core::services::{ConnectionLoader, LoaderConfig};
use folio_graphql::{AppState, ServerConfig, build_schema, serve_with_shutdown};
use folio_storage::{Database, DatabaseConfig, PgExecutor};

/// Folio CLI - keyset pagination server.
#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(about = "Folio - batched keyset pagination over PostgreSQL")]
#[command(version)]
struct Cli {
    /// PostgreSQL database URL.
    #[arg(long, env = "DATABASE_URL", default_value = "postgres://localhost/folio")]
    database_url: String,

    /// Table or view to expose, optionally schema qualified (`schema.table`).
    #[arg(long, env = "FOLIO_TABLE")]
    table: String,

    /// GraphQL server host.
    #[arg(long, env = "GRAPHQL_HOST", default_value = "0.0.0.0")]
    graphql_host: String,

    /// GraphQL server port.
    #[arg(long, env = "GRAPHQL_PORT", default_value = "4000")]
    graphql_port: u16,

    /// Disable the GraphiQL playground.
    #[arg(long, env = "NO_PLAYGROUND")]
    no_playground: bool,

    /// Prometheus metrics port.
    #[arg(long, env = "METRICS_PORT", default_value = "9090")]
    metrics_port: u16,

    /// Enable JSON log output.
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// How long to collect connection requests before dispatching a batch.
    #[arg(long, env = "BATCH_DELAY_MS", default_value = "0")]
    batch_delay_ms: u64,

    /// Split batches larger than this into several statements.
    #[arg(long, env = "MAX_BATCH_SIZE")]
    max_batch_size: Option<usize>,

    /// Disable per-request memoization of identical connection requests.
    #[arg(long, env = "NO_CACHE")]
    no_cache: bool,

    /// Use field names as column names instead of snake-casing them.
    #[arg(long, env = "VERBATIM_COLUMNS")]
    verbatim_columns: bool,

    /// Per-statement timeout in seconds (0 disables it).
    #[arg(long, env = "STATEMENT_TIMEOUT_SECS", default_value = "30")]
    statement_timeout_secs: u64,
}

impl Cli {
    fn loader_config(&self) -> LoaderConfig {
        let mut config = LoaderConfig {
            cache: !self.no_cache,
            batch_delay: Duration::from_millis(self.batch_delay_ms),
            max_batch_size: self.max_batch_size,
            ..LoaderConfig::default()
        };
        if self.verbatim_columns {
            config.column_names = Arc::new(str::to_string);
        }
        config
    }

    fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            statement_timeout: (self.statement_timeout_secs > 0)
                .then(|| Duration::from_secs(self.statement_timeout_secs)),
            ..DatabaseConfig::for_graphql(&self.database_url)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    // Prometheus metrics exporter (optional - failures don't crash the app)
    let metrics_enabled = match format!("0.0.0.0:{}", cli.metrics_port).parse::<std::net::SocketAddr>() {
        Ok(metrics_addr) => {
            match PrometheusBuilder::new()
                .with_http_listener(metrics_addr)
                .install()
            {
                Ok(()) => {
                    init_metrics();
                    true
                }
                Err(e) => {
                    warn!("⚠️  Failed to start metrics exporter: {}. Continuing without metrics.", e);
                    false
                }
            }
        }
        Err(e) => {
            warn!("⚠️  Invalid metrics address: {}. Continuing without metrics.", e);
            false
        }
    };

    // ─────────────────────────────────────────────────────────────────────────
    // 🚀 STARTUP
    // ─────────────────────────────────────────────────────────────────────────
    info!("🚀 Starting Folio");
    if cli.table.trim().is_empty() {
        bail!("--table must not be empty");
    }
    let source = Source::table(&cli.table);
    debug!(source = ?source, "Connection source");
    debug!(database_url = %mask_password(&cli.database_url), "Database endpoint");

    // ─────────────────────────────────────────────────────────────────────────
    // 🗄️ DATABASE
    // ─────────────────────────────────────────────────────────────────────────
    info!("🗄️  Connecting to database...");
    let db = Database::connect(&cli.database_config())
        .await
        .context("Failed to connect to database")?;

    if !db.is_healthy().await {
        bail!("Database is not answering queries");
    }
    info!("🗄️  Database ready");

    // ─────────────────────────────────────────────────────────────────────────
    // 🔗 LOADER
    // ─────────────────────────────────────────────────────────────────────────
    let loader_config = cli.loader_config();
    debug!(config = ?loader_config, "Loader configuration");

    let executor = Arc::new(PgExecutor::from_database(&db));
    let loader: ConnectionLoader = ConnectionLoader::with_config(executor, source, loader_config);

    // ─────────────────────────────────────────────────────────────────────────
    // ⚡ SERVICES START
    // ─────────────────────────────────────────────────────────────────────────
    let (shutdown_tx, mut graphql_shutdown_rx) = watch::channel(false);

    let graphql_config = ServerConfig {
        host: cli.graphql_host.clone(),
        port: cli.graphql_port,
        enable_playground: !cli.no_playground,
    };

    // Depth limit (15), complexity limit (500)
    let state = AppState::new(build_schema(), loader);
    let graphql_port = cli.graphql_port;
    let graphql_handle = tokio::spawn(
        async move {
            let shutdown_signal = async move {
                while !*graphql_shutdown_rx.borrow() {
                    if graphql_shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            };

            if let Err(e) = serve_with_shutdown(state, graphql_config, shutdown_signal).await {
                error!(error = %e, "❌ Server error");
            }
            debug!("Server stopped");
        }
        .instrument(info_span!("graphql")),
    );

    // ─────────────────────────────────────────────────────────────────────────
    // ✅ READY
    // ─────────────────────────────────────────────────────────────────────────
    info!("✅ Folio ready");
    info!("   ⚡ GraphQL:  http://localhost:{}/graphql", graphql_port);
    if metrics_enabled {
        info!(
            "   📊 Metrics:  http://localhost:{}/metrics",
            cli.metrics_port
        );
    } else {
        info!("   📊 Metrics:  disabled");
    }
    info!("   Press Ctrl+C to stop");

    shutdown_signal().await;

    // ─────────────────────────────────────────────────────────────────────────
    // 🛑 SHUTDOWN
    // ─────────────────────────────────────────────────────────────────────────
    info!("🛑 Shutting down...");
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(Duration::from_secs(10), graphql_handle).await {
        Ok(_) => debug!("GraphQL stopped"),
        Err(_) => warn!("⚠️  GraphQL shutdown timed out"),
    }

    db.close().await;

    info!("🛑 Shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber.
fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

/// Mask password in database URL for logging.
fn mask_password(url_str: &str) -> String {
    match url::Url::parse(url_str) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => url_str.to_string(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "❌ Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "❌ Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
