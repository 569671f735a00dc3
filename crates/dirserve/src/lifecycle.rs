//! Start/stop control of the single file server instance.
//!
//! [`ServerManager`] holds the run state behind one async mutex. Start checks
//! and claims the state under that lock, so two concurrent starts cannot both
//! succeed. The accept loop runs on its own task and owns its listener;
//! request handling never touches the state lock. Log lines are appended only
//! after the state lock has been released.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::error::ControlError;
use crate::logs::LogSink;
use crate::routes::{self, JSON_LOOKUP_PREFIX, TEXT_LOOKUP_PREFIX};
use crate::{AppState, Config};

/// Validated parameters of one start attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Canonical, absolute root directory
    pub root_dir: PathBuf,
    pub address: IpAddr,
    pub port: u16,
}

impl ServerConfig {
    /// Validate raw user input, reporting the first problem found.
    ///
    /// Order: directory present, directory exists, directory is a directory,
    /// address is an IP literal, port is an integer in 1..=65535.
    pub fn validate(dir: &str, address: &str, port: &str) -> Result<Self, ControlError> {
        if dir.trim().is_empty() {
            return Err(ControlError::EmptyDirectory);
        }

        let metadata = std::fs::metadata(dir).map_err(|source| ControlError::DirectoryNotFound {
            path: dir.to_string(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(ControlError::NotADirectory(dir.to_string()));
        }
        let root_dir =
            Path::new(dir)
                .canonicalize()
                .map_err(|source| ControlError::DirectoryNotFound {
                    path: dir.to_string(),
                    source,
                })?;

        let address: IpAddr = address
            .trim()
            .parse()
            .map_err(|_| ControlError::InvalidAddress(address.to_string()))?;

        let port = port
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|port| *port >= 1)
            .ok_or_else(|| ControlError::InvalidPort(port.to_string()))?;

        Ok(Self {
            root_dir,
            address,
            port,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// URL under which the server is reachable, e.g. `http://127.0.0.1:8085/`.
    pub fn url(&self) -> String {
        format!("http://{}/", self.socket_addr())
    }
}

struct RunningServer {
    /// Distinguishes instances so a stale accept loop cannot reset a newer one
    id: u64,
    config: ServerConfig,
    task: JoinHandle<()>,
}

enum ServerState {
    Idle,
    Running(RunningServer),
}

impl ServerState {
    /// Reset to Idle after accept loop `id` ended on its own. A loop that has
    /// already been replaced by a newer instance leaves the state untouched.
    fn finish(&mut self, id: u64) -> bool {
        if matches!(self, ServerState::Running(server) if server.id == id) {
            *self = ServerState::Idle;
            true
        } else {
            false
        }
    }
}

/// Consecutive failed accepts after which the accept loop gives up.
const MAX_ACCEPT_FAILURES: u32 = 64;
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Owner of the single file server instance.
pub struct ServerManager {
    config: Arc<Config>,
    logs: Arc<LogSink>,
    state: Arc<Mutex<ServerState>>,
    /// Mirrors whether the state is Running, for waiters outside the lock
    running: Arc<watch::Sender<bool>>,
    next_id: AtomicU64,
}

impl ServerManager {
    pub fn new(config: Config) -> Self {
        let logs = LogSink::new(config.log_capacity, config.log_file.clone());
        Self::with_logs(Arc::new(config), Arc::new(logs))
    }

    pub fn with_logs(config: Arc<Config>, logs: Arc<LogSink>) -> Self {
        Self {
            config,
            logs,
            state: Arc::new(Mutex::new(ServerState::Idle)),
            running: Arc::new(watch::Sender::new(false)),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn logs(&self) -> &Arc<LogSink> {
        &self.logs
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Receiver that observes every Idle/Running transition, including a
    /// server that stopped because its accept loop failed.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.running.subscribe()
    }

    /// Validate the parameters, bind the listener and spawn the accept loop.
    ///
    /// The bind is the availability check: no separate socket checks the port first,
    /// so a port reported free is already held by this server. Returns the
    /// success message containing the server URL.
    pub async fn start(&self, dir: &str, address: &str, port: &str) -> Result<String, ControlError> {
        let mut state = self.state.lock().await;
        if matches!(*state, ServerState::Running(_)) {
            return Err(ControlError::AlreadyRunning);
        }

        let server_config = ServerConfig::validate(dir, address, port)?;
        let addr = server_config.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ControlError::Bind {
                address: server_config.address.to_string(),
                port: server_config.port,
                source,
            })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let app_state = AppState::new(
            server_config.root_dir.clone(),
            self.config.clone(),
            self.logs.clone(),
        );
        let app = routes::file_routes(app_state);
        let task = tokio::spawn(run_server(
            id,
            listener,
            app,
            self.state.clone(),
            self.running.clone(),
            self.logs.clone(),
        ));

        *state = ServerState::Running(RunningServer {
            id,
            config: server_config.clone(),
            task,
        });
        self.running.send_replace(true);
        drop(state);

        let url = server_config.url();
        self.log_startup(&server_config, &url);
        Ok(format!("Server started successfully\nURL: {}", url))
    }

    fn log_startup(&self, server_config: &ServerConfig, url: &str) {
        let lookup_dir = self.config.lookup_dir.display();
        let base = url.trim_end_matches('/');

        self.logs.append("Starting server...");
        self.logs.append(format!(
            "Serving directory: {}",
            server_config.root_dir.display()
        ));
        self.logs
            .append(format!("Listening on: {}", server_config.socket_addr()));
        self.logs.append(format!("URL: {}", url));
        self.logs.append(format!(
            "Lookup API (example): {}{}2 => {}/txt/2.txt",
            base, TEXT_LOOKUP_PREFIX, lookup_dir
        ));
        self.logs.append(format!(
            "Lookup API (JSON example): {}{}1 => {}/json/1.json",
            base, JSON_LOOKUP_PREFIX, lookup_dir
        ));
        self.logs.append("----------------------------------------");
        self.logs.append("Server started successfully");
    }

    /// Stop the running server without draining in-flight requests.
    ///
    /// The state always ends up Idle, even when tearing the task down reports
    /// an error.
    pub async fn stop(&self) -> Result<String, ControlError> {
        let mut state = self.state.lock().await;
        let ServerState::Running(server) = std::mem::replace(&mut *state, ServerState::Idle)
        else {
            return Err(ControlError::NotRunning);
        };

        server.task.abort();
        // Wait for the task to be dropped so the port is released on return.
        let outcome = server.task.await;
        self.running.send_replace(false);
        drop(state);

        match outcome {
            Err(err) if err.is_panic() => {
                let err = ControlError::Shutdown(err.to_string());
                self.logs.append(err.to_string());
                Err(err)
            }
            _ => {
                info!("Stopped server on {}", server.config.socket_addr());
                self.logs.append("Server stopped");
                Ok("Server stopped".to_string())
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.state.lock().await, ServerState::Running(_))
    }

    /// Parameters of the running instance, if any.
    pub async fn running_config(&self) -> Option<ServerConfig> {
        match &*self.state.lock().await {
            ServerState::Running(server) => Some(server.config.clone()),
            ServerState::Idle => None,
        }
    }
}

/// Accept loop of one server instance.
///
/// Connections run on tasks owned by a `JoinSet` that lives inside this
/// future, so aborting the loop also drops every open connection.
async fn run_server(
    id: u64,
    listener: TcpListener,
    app: Router,
    state: Arc<Mutex<ServerState>>,
    running: Arc<watch::Sender<bool>>,
    logs: Arc<LogSink>,
) {
    let err = accept_connections(listener, app).await;
    logs.append(format!("Server error: {}", err));

    let mut guard = state.lock().await;
    if guard.finish(id) {
        running.send_replace(false);
    }
}

/// Runs until accepting fails persistently; only ever returns the error.
async fn accept_connections(listener: TcpListener, app: Router) -> std::io::Error {
    let mut connections = JoinSet::new();
    let mut failures = 0u32;

    loop {
        while connections.try_join_next().is_some() {}

        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => {
                failures = 0;
                accepted
            }
            Err(err) if is_connection_error(&err) => {
                debug!("Dropped incoming connection: {}", err);
                continue;
            }
            Err(err) => {
                // Typically fd exhaustion (EMFILE/ENFILE); wait for
                // connections to close and try again.
                failures += 1;
                if failures >= MAX_ACCEPT_FAILURES {
                    return err;
                }
                let delay = accept_backoff(failures);
                warn!("Accept failed ({}), retrying in {:?}", err, delay);
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        let service = TowerToHyperService::new(app.clone());
        connections.spawn(async move {
            let io = TokioIo::new(stream);
            if let Err(err) = Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(io, service)
                .await
            {
                debug!("Connection from {} ended with error: {}", remote, err);
            }
        });
    }
}

/// 5ms doubling per consecutive failure, capped at one second.
fn accept_backoff(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(16);
    Duration::from_millis(5 << exp).min(MAX_ACCEPT_BACKOFF)
}

fn is_connection_error(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
    )
}
