//! RCA server entry point.
//!
//! ```text
//! rca-server                           Run in the foreground
//! rca-server --config <path>           Load a custom config TOML
//! rca-server --bind 0.0.0.0:9400       Override the listen address
//! rca-server --gen-config              Write default config to stdout
//! rca-server --write-config <path>     Write default config to a file
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rca_server::config::ServerConfig;
use rca_server::service::RcaServer;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rca-server", about = "Streams remote-controlled render areas to clients")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "rca-server.toml")]
    config: PathBuf,

    /// Listen address (`host:port`), overriding the config file.
    #[arg(short, long)]
    bind: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to this path and exit.
    #[arg(long)]
    write_config: Option<PathBuf>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ServerConfig::default())?;
        println!("{text}");
        return Ok(());
    }
    if let Some(path) = &cli.write_config {
        ServerConfig::write_default(path)?;
        println!("Default config written to {}", path.display());
        return Ok(());
    }

    // Load config.
    let mut config = ServerConfig::load(&cli.config);
    if let Some(bind) = &cli.bind {
        let (host, port) = bind
            .rsplit_once(':')
            .ok_or_else(|| format!("--bind expects host:port, got {bind}"))?;
        config.network.bind_address = host.to_string();
        config.network.port = port.parse()?;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("rca-server v{}", env!("CARGO_PKG_VERSION"));
    info!("areas: {}", config.areas.names.join(", "));
    info!("target FPS: {}", config.stream.target_fps);
    info!("encoder: {}", config.stream.encoder);

    let server = RcaServer::new(config);
    let stop = server.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    server.run().await?;

    Ok(())
}
