use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use pagecast::config::Config;
use pagecast::device::DeviceRegistry;
use pagecast::service::Service;
use pagecast::subprocess::SubprocessManager;

/// Rebuild app pages from device logs and share them as they appear
#[derive(Parser)]
#[command(name = "pagecast")]
#[command(about = "Capture pages from Android log streams", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, default_value = "pagecast.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture pages from every ready device (default command)
    Run(RunArgs),
    /// List ready devices with their model and OS version
    Devices,
}

#[derive(clap::Args, Default)]
struct RunArgs {
    /// Base URL of the page collector
    #[arg(long)]
    collector_url: Option<String>,

    /// Address the realtime hub binds to
    #[arg(long)]
    hub_host: Option<String>,

    /// Port of the realtime hub
    #[arg(long)]
    hub_port: Option<u16>,

    /// Log tag to capture (repeatable; replaces the configured tags)
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Do not forward pages to the collector
    #[arg(long)]
    no_forward: bool,

    /// Do not start the realtime hub
    #[arg(long)]
    no_hub: bool,
}

impl RunArgs {
    fn apply(self, config: &mut Config) {
        if let Some(url) = self.collector_url {
            config.collector.base_url = url;
        }
        if let Some(host) = self.hub_host {
            config.hub.host = host;
        }
        if let Some(port) = self.hub_port {
            config.hub.port = port;
        }
        if !self.tags.is_empty() {
            config.device.tags = self.tags;
        }
        if self.no_forward {
            config.collector.enabled = false;
        }
        if self.no_hub {
            config.hub.enabled = false;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(Some(&cli.config)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let log_level = match cli.verbose {
        0 => config.log_level.clone().unwrap_or_else(|| "info".to_string()),
        1 => "debug".to_string(),
        2 => "trace".to_string(),
        _ => "trace,hyper=debug,tower=debug".to_string(),
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.verbose >= 2) // Show target module for -vv and above
        .with_thread_ids(cli.verbose >= 3) // Show thread IDs for -vvv
        .with_line_number(cli.verbose >= 3) // Show line numbers for -vvv
        .init();

    debug!("pagecast started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match cli.command {
        Some(Commands::Run(args)) => run_capture(config, args).await,
        Some(Commands::Devices) => list_devices(&config).await,
        None => run_capture(config, RunArgs::default()).await,
    };

    if let Err(e) = result {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run_capture(mut config: Config, args: RunArgs) -> anyhow::Result<()> {
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let service = Service::prepare(&config, SubprocessManager::production().runner(), shutdown)
        .await
        .context("Startup failed")?;
    if let Some(addr) = service.hub_addr() {
        info!("Subscribers can connect to ws://{}/ws", addr);
    }

    service.run().await?;
    Ok(())
}

async fn list_devices(config: &Config) -> anyhow::Result<()> {
    let registry = DeviceRegistry::new(SubprocessManager::production().runner(), &config.device);
    registry.check_available().await?;

    let ids = registry.list_devices().await;
    if ids.is_empty() {
        println!("No ready devices");
        return Ok(());
    }

    println!("{:<24} {:<10} {:<24} OS", "ID", "CLASS", "MODEL");
    for id in ids {
        let device = registry.describe(&id).await;
        println!(
            "{:<24} {:<10} {:<24} {}",
            device.id, device.class, device.model, device.os_version
        );
    }
    Ok(())
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    debug!("SIGTERM handler unavailable: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        info!("Shutdown requested");
        shutdown.cancel();
    });
}
