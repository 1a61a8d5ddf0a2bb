//! tilecast render node: entry point.
//!
//! ```text
//! tilecast-node                       Connect using tilecast-node.toml
//! tilecast-node --composer <host>     Override the composer address
//! tilecast-node --config <path>       Load a custom config TOML
//! tilecast-node --gen-config          Write default config to stdout
//! ```

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tilecast_node::config::NodeConfig;
use tilecast_node::service::NodeService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tilecast-node", about = "tilecast render node")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tilecast-node.toml")]
    config: PathBuf,

    /// Composer host (overrides config).
    #[arg(long)]
    composer: Option<String>,

    /// Composer port (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&NodeConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = NodeConfig::load(&cli.config);
    if let Some(host) = cli.composer {
        config.network.composer_address = host;
    }
    if let Some(port) = cli.port {
        config.network.port = port;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("tilecast-node v{}", env!("CARGO_PKG_VERSION"));
    info!("composer: {}:{}", config.network.composer_address, config.network.port);
    info!("renderer: {:?}, encoding: {:?}", config.render.renderer, config.image_encoding());

    let service = NodeService::new(config);
    let stop = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, Ordering::SeqCst);
    });

    service.run().await?;

    Ok(())
}
