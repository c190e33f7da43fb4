mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use chain_insight::api::{self, AppState};
use chain_insight::config::Config;
use chain_insight::models::{AnalysisRequest, RecordKind};
use chain_insight::pipeline::AppContext;
use chain_insight::registry::NETWORKS;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    match cli.command {
        Commands::Serve { addr } => {
            let bind = addr.unwrap_or_else(|| config.http_bind_addr.clone());
            let ctx = Arc::new(AppContext::from_config(&config)?);
            let sweeper = ctx.spawn_cache_sweeper();
            let state = AppState {
                ctx,
                default_network_id: config.default_network_id,
            };
            let served = api::run_http_server(&bind, state).await;
            sweeper.abort();
            served?;
        }
        Commands::AnalyzeTx { hash, network } => {
            analyze_once(&config, RecordKind::Transaction, hash, network).await?;
        }
        Commands::AnalyzeBlock { block, network } => {
            analyze_once(&config, RecordKind::Block, block, network).await?;
        }
        Commands::Networks => {
            for network in NETWORKS {
                let configured = config.networks.contains_key(&network.id);
                println!(
                    "{:>10}  {:<18} {:<4} testnet={:<5} configured={}",
                    network.id,
                    network.display_name,
                    network.native_currency_symbol,
                    network.is_testnet,
                    configured
                );
            }
        }
    }

    Ok(())
}

async fn analyze_once(
    config: &Config,
    kind: RecordKind,
    identifier: String,
    network: Option<u64>,
) -> anyhow::Result<()> {
    let ctx = AppContext::from_config(config)?;
    let response = ctx
        .analyze(AnalysisRequest {
            kind,
            identifier,
            network_id: network.unwrap_or(config.default_network_id),
        })
        .await;
    println!(
        "{}",
        serde_json::to_string_pretty(&response).context("failed to render response")?
    );
    if let Some(failure) = response.failure {
        anyhow::bail!(failure);
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
}
