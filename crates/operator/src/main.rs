use std::path::PathBuf;

use clap::Parser;
use kube::Client;
use tracing::info;
use worker_operator::config::OperatorConfig;
use worker_operator::controller;
use worker_operator::logging::{init_logging, LogFormat};

#[derive(Parser, Debug)]
#[command(name = "worker-operator", version, about = "Reconciles WorkerCluster resources into worker Deployments")]
struct Cli {
    /// trace|debug|info|warn|error
    #[arg(long, default_value = "info")]
    log_level: String,
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
    /// Config file (TOML); defaults to the user config dir if present
    #[arg(long)]
    config: Option<PathBuf>,
    /// Only watch this namespace
    #[arg(long)]
    namespace: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, &cli.log_format)?;
    let mut cfg = OperatorConfig::load(cli.config.as_deref())?;
    if let Some(ns) = cli.namespace { cfg.namespace = Some(ns); }
    let client = Client::try_default().await?;
    info!(namespace=?cfg.namespace, "operator starting");
    controller::run(client, cfg).await
}
