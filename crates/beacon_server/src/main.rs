//! Beacon API Server

use std::path::PathBuf;

use beacon_core::config::BeaconConfig;
use beacon_server::start_server;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "beacon_core=debug,beacon_server=debug,tower_http=info";

#[derive(Parser, Debug)]
#[command(name = "beacon-server", version, about = "Beacon API server")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `server.bind_address`
    #[arg(long)]
    bind: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_timer(tracing_subscriber::fmt::time::LocalTime::rfc_3339());

    if json {
        builder.json().init();
    } else {
        builder.pretty().init();
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .rgb_colors(miette::RgbColors::Preferred)
                .with_cause_chain()
                .with_syntax_highlighting(miette::highlighters::SyntectHighlighter::default())
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }))?;
    miette::set_panic_hook();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => BeaconConfig::load(path).await?,
        None => BeaconConfig::load_or_default().await?,
    };
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }

    init_tracing(cli.json_logs || config.server.json_logs);
    tracing::debug!(bind = %config.server.bind_address, "Configuration loaded");

    start_server(config).await.into_diagnostic()?;

    Ok(())
}
