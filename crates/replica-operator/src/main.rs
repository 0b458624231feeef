//! Replica Operator
//!
//! Watches `Controller` resources and keeps their target Deployments owned,
//! provisioned and at the declared replica count.

use anyhow::{Context, Result};
use clap::Parser;
use kube::Client;
use replica_operator::config::{ReconcilerConfig, DEFAULT_FIELD_MANAGER};
use replica_operator::controller;
use replica_operator::crd::Controller;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

/// Replica Operator
#[derive(Parser, Debug)]
#[command(name = "replica-operator")]
#[command(about = "Kubernetes operator that converges Deployment replica counts")]
#[command(version)]
struct Args {
    /// Metrics server address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,

    /// Health probe address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: SocketAddr,

    /// Namespace to watch (empty for cluster-wide)
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "")]
    namespace: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Enable JSON log format
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    log_json: bool,

    /// Seconds between periodic re-checks of a converged resource
    #[arg(long, env = "RESYNC_SECONDS", default_value = "300")]
    resync_seconds: u64,

    /// Deadline for a single reconcile pass
    #[arg(long, env = "RECONCILE_TIMEOUT_SECONDS", default_value = "30")]
    reconcile_timeout_seconds: u64,

    /// Maximum concurrent reconciles (0 = unbounded)
    #[arg(long, env = "CONCURRENCY", default_value = "0")]
    concurrency: u16,

    /// Do not write the Controller status subresource
    #[arg(long, env = "DISABLE_STATUS")]
    disable_status: bool,

    /// Print CRD YAML and exit
    #[arg(long)]
    print_crd: bool,
}

impl Args {
    fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            resync_interval: Duration::from_secs(self.resync_seconds),
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout_seconds),
            update_status: !self.disable_status,
            concurrency: self.concurrency,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crd {
        print_crd()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = if args.namespace.is_empty() {
            "all"
        } else {
            &args.namespace
        },
        "Starting Replica Operator"
    );

    let metrics_addr = args.metrics_addr;
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics_addr).await {
            tracing::error!(error = %e, "Metrics server failed");
        }
    });

    let health_addr = args.health_addr;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_addr).await {
            tracing::error!(error = %e, "Health server failed");
        }
    });

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let config = args.reconciler_config();

    // Empty string means cluster-wide
    let namespace = if args.namespace.is_empty() {
        None
    } else {
        Some(args.namespace)
    };

    controller::run_controller(client, namespace, config)
        .await
        .context("Controller failed")?;

    Ok(())
}

/// Initialize logging subsystem
fn init_logging(args: &Args) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false);

    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Start the Prometheus metrics server
async fn start_metrics_server(addr: SocketAddr) -> Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    info!(address = %addr, "Starting metrics server");

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    std::future::pending::<()>().await;

    Ok(())
}

/// Start the health probe server
async fn start_health_server(addr: SocketAddr) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    info!(address = %addr, "Starting health server");

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind health server")?;

    loop {
        let (mut socket, _) = listener.accept().await?;

        tokio::spawn(async move {
            let mut buf = [0; 1024];
            if socket.read(&mut buf).await.is_ok() {
                let response = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK";
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
    }
}

/// Print the CRD YAML for installation
fn print_crd() -> Result<()> {
    use kube::CustomResourceExt;

    let crd = Controller::crd();
    let yaml = serde_yaml::to_string(&crd)?;
    println!("{}", yaml);

    Ok(())
}
