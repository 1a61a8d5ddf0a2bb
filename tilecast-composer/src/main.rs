//! tilecast composer: entry point.
//!
//! ```text
//! tilecast-composer                    Listen with defaults
//! tilecast-composer --config <path>    Use custom config TOML
//! tilecast-composer --tiles 3x2        Force a tile grid
//! tilecast-composer --gen-config       Dump default config and exit
//! ```

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tilecast_composer::config::ComposerConfig;
use tilecast_composer::service::ComposerService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tilecast-composer", about = "tilecast composer and compositor")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tilecast-composer.toml")]
    config: PathBuf,

    /// Port to listen on (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Fixed tile grid as WxH (overrides config).
    #[arg(long, value_parser = parse_tiles)]
    tiles: Option<[u32; 2]>,

    /// Write PNG snapshots of the composite here (overrides config).
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

fn parse_tiles(s: &str) -> Result<[u32; 2], String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got {s:?}"))?;
    let w: u32 = w.trim().parse().map_err(|e| format!("bad width: {e}"))?;
    let h: u32 = h.trim().parse().map_err(|e| format!("bad height: {e}"))?;
    if w == 0 || h == 0 {
        return Err("tile grid dimensions must be non-zero".into());
    }
    Ok([w, h])
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ComposerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ComposerConfig::load(&cli.config);
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(tiles) = cli.tiles {
        config.composite.tiles = Some(tiles);
    }
    if let Some(path) = cli.snapshot {
        config.composite.snapshot_path = path.display().to_string();
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("tilecast-composer v{}", env!("CARGO_PKG_VERSION"));
    info!("listening on {}:{}", config.network.bind_address, config.network.port);
    info!(
        "screen: {}x{}, max render nodes: {}",
        config.camera.screen_width, config.camera.screen_height, config.network.max_peers
    );

    let service = ComposerService::new(config);
    let stop = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, Ordering::SeqCst);
    });

    service.run().await?;

    Ok(())
}
