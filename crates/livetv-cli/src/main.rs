mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, EnvFilter};

use livetv_core::{
    Channel, ChannelId, LiveService, MemoryChannelStore, RelayConfig, SecretTokenProvider,
};

fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");

    if GIT_HASH.is_empty() {
        Box::leak(VERSION.to_string().into_boxed_str())
    } else {
        Box::leak(format!("{VERSION} ({GIT_HASH})").into_boxed_str())
    }
}

/// Live source relay: resolves channel pages into playable HLS feeds.
#[derive(Parser)]
#[command(name = "livetv", version = version_string(), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server.
    Serve {
        /// Listen address (e.g. 0.0.0.0:9000). Overrides config file.
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Path to TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Serve every endpoint without token checks.
        #[arg(long, default_value_t = false)]
        disable_protection: bool,
    },
    /// Resolve one source URL and print what a player would get.
    Resolve {
        /// Channel page or stream URL.
        url: String,

        /// Plugin to resolve with.
        #[arg(short, long, default_value = "auto")]
        parser: String,

        /// Upstream proxy (http://, socks5://).
        #[arg(long)]
        proxy: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            listen,
            config,
            disable_protection,
        } => {
            run_serve(listen, config, disable_protection).await;
        }
        Commands::Resolve { url, parser, proxy } => {
            fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
                )
                .init();
            run_resolve(url, parser, proxy).await;
        }
    }
}

async fn run_serve(
    listen_override: Option<SocketAddr>,
    config_path: Option<PathBuf>,
    disable_protection: bool,
) {
    let app_config = if let Some(ref path) = config_path {
        match config::AppConfig::load(path) {
            Ok(c) => {
                init_tracing(&c.server.log_format);
                tracing::info!(path = %path.display(), "Loaded config file");
                c
            }
            Err(e) => {
                init_tracing("pretty");
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        }
    } else {
        init_tracing("pretty");
        config::AppConfig::default()
    };

    let listen = listen_override.unwrap_or(app_config.server.listen);
    let disable_protection = disable_protection || app_config.server.disable_protection;
    if app_config.server.secret.is_empty() && !disable_protection {
        tracing::warn!("No server secret configured, tokens are empty");
    }

    let channels = app_config.channels();
    let channel_count = channels.len();
    let service = Arc::new(LiveService::new(
        app_config.relay_config(),
        Arc::new(MemoryChannelStore::new(channels)),
        Arc::new(SecretTokenProvider::new(app_config.server.secret.clone())),
    ));
    tracing::info!(
        channels = channel_count,
        plugins = service.plugins().len(),
        base_url = %service.config().base_url,
        "Relay initialized"
    );

    let refresh_handle = service.clone().spawn_refresh_loop();

    let state = livetv_api::state::AppState::new(service)
        .with_disable_protection(disable_protection);

    tracing::info!(%listen, disable_protection, "Starting relay server");
    if let Err(e) = livetv_api::serve_with_state(listen, state, livetv_api::shutdown_signal()).await
    {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(1);
    }

    tracing::info!("Shutdown signal received, stopping refresh loop...");
    refresh_handle.abort();
    tracing::info!("Shutdown complete");
}

async fn run_resolve(url: String, parser: String, proxy: Option<String>) {
    let mut channel = Channel::new(ChannelId::root(0), "cli", url.clone()).with_parser(parser);
    if let Some(ref p) = proxy {
        channel = channel.with_proxy_url(p);
    }
    let service = LiveService::new(
        RelayConfig::default(),
        Arc::new(MemoryChannelStore::new(vec![channel.clone()])),
        Arc::new(SecretTokenProvider::default()),
    );

    println!(
        "{} {}",
        style("livetv").bold(),
        style(env!("CARGO_PKG_VERSION")).dim()
    );
    println!("  {} {}", style("url:   ").dim(), style(&url).bold());
    println!("  {} {}", style("parser:").dim(), channel.parser);
    if let Some(ref p) = proxy {
        println!("  {} {}", style("proxy: ").dim(), p);
    }
    println!();

    let spinner = ProgressBar::new_spinner();
    if let Ok(spinner_style) = ProgressStyle::with_template("{spinner} {msg}") {
        spinner.set_style(spinner_style);
    }
    spinner.set_message("Resolving...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = service.refresh(&channel, true).await;
    spinner.finish_and_clear();

    let info = match result {
        Ok(info) => info,
        Err(e) => {
            println!("  {} {}", style("ERROR").red().bold(), e);
            std::process::exit(1);
        }
    };

    println!("  {} {}", style("plugin:").dim(), style(&info.plugin).green());
    if !info.logo.is_empty() {
        println!("  {} {}", style("logo:  ").dim(), info.logo);
    }

    let resolved = match service.channel(&channel.id).await {
        Ok(c) => c,
        Err(e) => {
            println!("  {} {}", style("ERROR").red().bold(), e);
            std::process::exit(1);
        }
    };
    if resolved.children.is_empty() {
        println!("  {} {}", style("live:  ").dim(), style(&info.live_url).bold());
    } else {
        println!(
            "  {} {} channels",
            style("group: ").dim(),
            resolved.children.len()
        );
        for child in &resolved.children {
            let category = if child.category.is_empty() {
                String::new()
            } else {
                format!(" [{}]", child.category)
            };
            println!(
                "    {:<8} {}{}  {}",
                child.id.to_string(),
                child.name,
                style(category).dim(),
                style(&child.url).dim()
            );
        }
    }

    if !info.extra.headers.is_empty() {
        if let Ok(headers) = serde_json::to_string(&info.extra.headers) {
            println!("  {} {}", style("headers:").dim(), headers);
        }
    }
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format {
        "json" => {
            fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}
