use clap::Parser;
use kodi_mock_server::config::ConfigManager;
use kodi_mock_server::{logging, Dispatcher, HandlerSet, MockTcpServer};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(
    name = "kodi-mock-server",
    version,
    about = "Mock media-center JSON-RPC server for remote-control tests"
)]
struct Args {
    /// Optional config file override (TOML).
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:9090.
    #[arg(long)]
    bind: Option<String>,

    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let manager = match ConfigManager::load_from_fs(args.config) {
        Ok(manager) => manager,
        Err(err) => {
            eprintln!("failed to load config: {err}");
            std::process::exit(2);
        }
    };
    let config = match manager.update(|config| {
        if let Some(bind) = args.bind {
            config.server.bind = bind;
        }
        if let Some(level) = args.log_level {
            config.logging.level = level;
        }
    }) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid command line: {err}");
            std::process::exit(2);
        }
    };

    let _log_guard = logging::init(&config.logging);
    tracing::info!(
        server = kodi_mock_server::APP_NAME,
        version = kodi_mock_server::version(),
        config_path = %config_path(&manager),
        "mock server bootstrap"
    );

    let dispatcher = Arc::new(Dispatcher::with_poll_interval(config.wait_poll_interval()));
    let handlers = HandlerSet::new();
    handlers.register_all(&dispatcher);

    let server = MockTcpServer::with_config(config, dispatcher);
    match server.start() {
        Ok(addr) => tracing::info!(addr = %addr, "ready for connections"),
        Err(err) => {
            tracing::error!(error = %err, "failed to start server");
            std::process::exit(1);
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
    }
    tracing::info!("shutting down");

    if let Err(err) = server.shutdown().await {
        tracing::error!(error = %err, "shutdown did not complete cleanly");
        std::process::exit(1);
    }
}

fn config_path(manager: &ConfigManager) -> String {
    manager
        .config_path()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<defaults>".to_string())
}
