use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dirserve::control::control_routes;
use dirserve::{Config, ControlError, ServerManager};

#[derive(Parser, Debug)]
#[command(name = "dirserve")]
#[command(about = "Serve a local directory over HTTP with uploads and listings")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, env = "DIRSERVE_VERBOSE")]
    verbose: bool,

    /// Config file path (optional)
    #[arg(short, long, global = true, env = "DIRSERVE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve a directory until interrupted
    Serve(ServeArgs),
    /// Run the HTTP control API; the file server is started and stopped through it
    Control(ControlArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Root directory to serve files from
    #[arg(short, long, env = "DIRSERVE_ROOT", default_value = ".")]
    root: PathBuf,

    /// Address to bind to
    #[arg(short, long, env = "DIRSERVE_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on
    #[arg(short, long, env = "DIRSERVE_PORT", default_value = "8085")]
    port: String,
}

#[derive(Args, Debug)]
struct ControlArgs {
    /// Address of the control API
    #[arg(short, long, env = "DIRSERVE_CONTROL_LISTEN", default_value = "127.0.0.1:8090")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "dirserve=debug,tower_http=debug"
    } else {
        "dirserve=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    let persist_logs = config.persist_logs;

    let manager = Arc::new(ServerManager::new(config));
    if persist_logs {
        manager.logs().set_saving(true);
    }

    match cli.command {
        Command::Serve(args) => serve(manager, args).await,
        Command::Control(args) => control(manager, args).await,
    }
}

async fn serve(manager: Arc<ServerManager>, args: ServeArgs) -> Result<()> {
    let root = args.root.to_string_lossy();
    let message = match manager.start(&root, &args.bind, &args.port).await {
        Ok(message) => message,
        Err(e) => bail!("failed to start server: {}", e),
    };
    info!("{}", message.replace('\n', " "));

    let mut running = manager.subscribe();
    tokio::select! {
        _ = shutdown_signal() => {},
        _ = running.wait_for(|running| !*running) => {
            let reason = manager
                .logs()
                .snapshot()
                .pop()
                .unwrap_or_else(|| "server stopped".to_string());
            bail!("file server exited unexpectedly: {}", reason);
        }
    }
    info!("Shutdown signal received, stopping server...");

    if let Err(e) = manager.stop().await {
        warn!("Error during shutdown: {}", e);
    }
    Ok(())
}

async fn control(manager: Arc<ServerManager>, args: ControlArgs) -> Result<()> {
    let app = control_routes(manager.clone());

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding control API on {}", args.listen))?;
    info!("Control API listening on {}", args.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running control API")?;

    match manager.stop().await {
        Ok(_) | Err(ControlError::NotRunning) => {}
        Err(e) => warn!("Error during shutdown: {}", e),
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
