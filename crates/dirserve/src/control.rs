//! Control plane for user interfaces.
//!
//! [`ControlPlane`] is what a desktop shell or web UI drives: start and stop
//! the server, read and clear the log, toggle log persistence and list local
//! addresses to bind to. [`control_routes`] exposes it over HTTP/JSON.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::ControlError;
use crate::lifecycle::ServerManager;

/// Outcome of a start or stop request, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
}

impl From<Result<String, ControlError>> for ControlResponse {
    fn from(result: Result<String, ControlError>) -> Self {
        match result {
            Ok(message) => Self {
                success: true,
                message,
            },
            Err(err) => Self {
                success: false,
                message: err.to_string(),
            },
        }
    }
}

/// A bindable local address with a human-readable label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpInfo {
    pub ip: String,
    pub name: String,
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn start_server(&self, dir: &str, address: &str, port: &str) -> ControlResponse;

    async fn stop_server(&self) -> ControlResponse;

    /// Buffered log lines, oldest first.
    async fn logs(&self) -> Vec<String>;

    async fn clear_logs(&self);

    async fn is_running(&self) -> bool;

    /// Enable or disable appending log lines to the log file.
    async fn set_save_logs(&self, enable: bool);

    async fn local_ips(&self) -> Vec<IpInfo>;
}

#[async_trait]
impl ControlPlane for ServerManager {
    async fn start_server(&self, dir: &str, address: &str, port: &str) -> ControlResponse {
        self.start(dir, address, port).await.into()
    }

    async fn stop_server(&self) -> ControlResponse {
        self.stop().await.into()
    }

    async fn logs(&self) -> Vec<String> {
        self.logs().snapshot()
    }

    async fn clear_logs(&self) {
        self.logs().clear();
    }

    async fn is_running(&self) -> bool {
        ServerManager::is_running(self).await
    }

    async fn set_save_logs(&self, enable: bool) {
        self.logs().set_saving(enable);
    }

    async fn local_ips(&self) -> Vec<IpInfo> {
        local_ips()
    }
}

/// Loopback and wildcard first, then every non-loopback IPv4 interface address.
pub fn local_ips() -> Vec<IpInfo> {
    let mut ips = vec![
        IpInfo {
            ip: "127.0.0.1".to_string(),
            name: "local".to_string(),
        },
        IpInfo {
            ip: "0.0.0.0".to_string(),
            name: "all interfaces".to_string(),
        },
    ];
    let mut seen: HashSet<String> = ips.iter().map(|info| info.ip.clone()).collect();

    match if_addrs::get_if_addrs() {
        Ok(interfaces) => {
            for iface in interfaces {
                if iface.is_loopback() {
                    continue;
                }
                let IpAddr::V4(ip) = iface.ip() else {
                    continue;
                };
                let ip = ip.to_string();
                if seen.insert(ip.clone()) {
                    ips.push(IpInfo {
                        ip,
                        name: iface.name,
                    });
                }
            }
        }
        Err(e) => warn!("Failed to enumerate network interfaces: {}", e),
    }

    ips
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub dir: String,
    pub ip: String,
    /// Kept as text so malformed ports surface as a validation message.
    pub port: String,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub enable: bool,
}

#[derive(Debug, Serialize)]
pub struct RunStateResponse {
    pub running: bool,
}

#[derive(Debug, Serialize)]
pub struct SaveLogsResponse {
    pub saving: bool,
}

type Control = Arc<dyn ControlPlane>;

/// Build the control API router.
pub fn control_routes(control: Control) -> Router {
    Router::new()
        .route("/api/startServer", post(start_server))
        .route("/api/stopServer", post(stop_server))
        .route("/api/getLogs", get(get_logs))
        .route("/api/clearLogs", post(clear_logs))
        .route("/api/getRunState", get(get_run_state))
        .route("/api/toggleSaveLogs", post(toggle_save_logs))
        .route("/api/getLocalIPs", get(get_local_ips))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(control)
}

async fn start_server(
    State(control): State<Control>,
    Json(request): Json<StartRequest>,
) -> Json<ControlResponse> {
    Json(
        control
            .start_server(&request.dir, &request.ip, &request.port)
            .await,
    )
}

async fn stop_server(State(control): State<Control>) -> Json<ControlResponse> {
    Json(control.stop_server().await)
}

async fn get_logs(State(control): State<Control>) -> Json<Vec<String>> {
    Json(control.logs().await)
}

async fn clear_logs(State(control): State<Control>) -> Json<ControlResponse> {
    control.clear_logs().await;
    Json(ControlResponse {
        success: true,
        message: "Logs cleared".to_string(),
    })
}

async fn get_run_state(State(control): State<Control>) -> Json<RunStateResponse> {
    Json(RunStateResponse {
        running: control.is_running().await,
    })
}

async fn toggle_save_logs(
    State(control): State<Control>,
    Json(request): Json<ToggleRequest>,
) -> Json<SaveLogsResponse> {
    control.set_save_logs(request.enable).await;
    Json(SaveLogsResponse {
        saving: request.enable,
    })
}

async fn get_local_ips(State(control): State<Control>) -> Json<Vec<IpInfo>> {
    Json(control.local_ips().await)
}
