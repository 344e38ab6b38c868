use anyhow::Context;
use clap::{Parser, Subcommand};
use socksify_core::{ConfigLoader, Gateway, LogEntry, NoopRelay, Protocol};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::filter::EnvFilter;

mod relay;

use relay::TcpProbeRelay;

#[derive(Parser, Debug)]
#[command(name = "socksify")]
#[command(about = "Per-process SOCKS5 routing gateway")]
struct Args {
    /// Config file path
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the gateway and route until interrupted
    Run,

    /// Print the routing decision for one connection attempt
    Check {
        /// Executable name of the connecting process
        #[arg(long, short = 'p')]
        process: String,

        /// Destination as ip:port
        #[arg(long, short = 'd')]
        destination: SocketAddr,

        /// tcp | udp
        #[arg(long, default_value = "tcp")]
        protocol: Protocol,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = if args.verbose {
        EnvFilter::from_default_env()
            .add_directive(tracing_subscriber::filter::LevelFilter::DEBUG.into())
    } else {
        EnvFilter::from_default_env()
            .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = ConfigLoader::load_or_default(args.config).context("Failed to load config")?;

    match args.command {
        Command::Run => run(config).await,
        Command::Check {
            process,
            destination,
            protocol,
        } => {
            let gateway = Gateway::from_config(&config, Arc::new(NoopRelay))
                .context("Invalid configuration")?;
            println!("{}", gateway.decide(&process, destination, protocol));
            Ok(())
        }
    }
}

async fn run(config: socksify_core::GatewayConfig) -> anyhow::Result<()> {
    let gateway = Gateway::from_config(&config, Arc::new(TcpProbeRelay))
        .context("Invalid configuration")?;
    gateway.subscribe(|batch: &[LogEntry]| {
        for entry in batch {
            tracing::info!(target: "socksify::events", "{}", entry);
        }
    });

    let failures = gateway.start().context("Failed to start gateway")?;
    if !failures.is_empty() {
        tracing::warn!("{} proxies failed to start", failures.len());
    }
    tracing::info!("Routing {} proxies, press Ctrl-C to stop", gateway.proxies().len());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    gateway.stop().context("Failed to stop gateway")?;
    Ok(())
}
