//! Entry point for the governance gateway process.

use clap::Parser;

#[derive(Parser)]
#[command(name = "agentgov", version, about = "Agent orchestration & governance core")]
struct Cli {
    /// Port to bind the HTTP gateway to.
    #[arg(long)]
    port: Option<u16>,

    /// Bind address mode: loopback or lan.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = agentgov_core::config::GovernanceConfig::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(bind) = cli.bind {
        config.bind = bind.parse().unwrap_or_default();
    }

    agentgov_gateway::run(config).await
}
