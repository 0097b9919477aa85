/*
 * SPDX-FileCopyrightText: Copyright (c) 2021-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: LicenseRef-NvidiaProprietary
 *
 * NVIDIA CORPORATION, its affiliates and licensors retain all intellectual
 * property and proprietary rights in and to this material, related
 * documentation and any modifications thereto. Any use, reproduction,
 * disclosure or distribution of this material and related documentation
 * without an express license agreement from NVIDIA CORPORATION or
 * its affiliates is strictly prohibited.
 */

//! HTTP API: `POST /v1/reboot` and `GET /v1/e2e`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum_server::tls_rustls::RustlsConfig;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use eyre::Context;
use http::StatusCode;
use http::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use serde::Deserialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::ShutdownHandle;
use crate::config::{Config, HttpAuthConfig};
use crate::e2e::ProbeCollector;
use crate::metrics;
use crate::reboot::{RebootError, RebootHandler, RebootMethod};

const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AppState {
    pub reboot: Arc<RebootHandler>,
    pub probe: Arc<ProbeCollector>,
}

pub fn router(state: AppState, http_auth: Option<&HttpAuthConfig>) -> Router {
    let router = Router::new()
        .route("/v1/reboot", post(reboot))
        .route("/v1/e2e", get(e2e))
        .with_state(state);

    match http_auth {
        Some(auth) => router.layer(middleware::from_fn_with_state(
            Arc::<str>::from(basic_auth_header(auth)),
            require_basic_auth,
        )),
        None => router,
    }
}

#[derive(Debug, Deserialize)]
struct RebootParams {
    host: Option<String>,
    method: Option<String>,
}

async fn reboot(
    State(state): State<AppState>,
    Query(params): Query<RebootParams>,
) -> (StatusCode, String) {
    let Some(host) = params.host.filter(|h| !h.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            "URL parameter 'host' is missing".to_string(),
        );
    };
    let method = RebootMethod::from_query(params.method.as_deref());
    tracing::info!(%host, ?method, "reboot requested");

    match state.reboot.reboot(&host, method).await {
        Ok(output) => (StatusCode::OK, output),
        Err(err) => {
            let body = match &err {
                RebootError::InvalidTarget(e) => e.to_string(),
                _ => format!("Reboot failed: {err}"),
            };
            (err.status_code(), body)
        }
    }
}

#[derive(Debug, Deserialize)]
struct E2eParams {
    target: Option<String>,
}

async fn e2e(State(state): State<AppState>, Query(params): Query<E2eParams>) -> Response {
    let Some(target) = params.target.filter(|t| !t.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            "URL parameter 'target' is missing",
        )
            .into_response();
    };

    let report = match state.probe.probe(&target).await {
        Ok(report) => report,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    // Probe failures are reported in the exposition, the request itself still succeeds.
    match metrics::encode_probe_result(&report.bmc_hostname, &report.outcome) {
        Ok(body) => ([(CONTENT_TYPE, metrics::content_type())], body).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Encoding error: {e}"),
        )
            .into_response(),
    }
}

fn basic_auth_header(auth: &HttpAuthConfig) -> String {
    let credentials = BASE64.encode(format!("{}:{}", auth.username, auth.password));
    format!("Basic {credentials}")
}

async fn require_basic_auth(
    State(expected): State<Arc<str>>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == &*expected);
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            [(WWW_AUTHENTICATE, "Basic realm=\"reboot-service\"")],
            "Unauthorized",
        )
            .into_response();
    }
    next.run(request).await
}

/// Serves the API on `config.listen_address`, over TLS when configured.
pub async fn spawn(config: &Config, state: AppState) -> eyre::Result<ApiHandle> {
    if config.http_auth.is_none() {
        tracing::warn!("http_auth is not configured, the reboot API accepts unauthenticated requests");
    }
    let app = router(state, config.http_auth.as_ref());

    let listener = std::net::TcpListener::bind(config.listen_address)
        .with_context(|| format!("Error listening on {}", config.listen_address))?;
    listener
        .set_nonblocking(true)
        .context("error setting listener to non-blocking")?;
    let local_addr = listener.local_addr().context("error getting listen address")?;

    let axum_handle = axum_server::Handle::new();
    let server = match &config.tls {
        Some(tls) => {
            let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await
                .with_context(|| {
                    format!(
                        "Error loading TLS certificate {} and key {}",
                        tls.cert_path.display(),
                        tls.key_path.display()
                    )
                })?;
            tracing::info!("listening on https://{local_addr}");
            tokio::spawn(
                axum_server::from_tcp_rustls(listener, rustls_config)
                    .handle(axum_handle.clone())
                    .serve(app.into_make_service()),
            )
        }
        None => {
            tracing::info!("listening on http://{local_addr}");
            tokio::spawn(
                axum_server::from_tcp(listener)
                    .handle(axum_handle.clone())
                    .serve(app.into_make_service()),
            )
        }
    };

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        // A dropped sender also shuts the server down.
        shutdown_rx.await.ok();
        tracing::info!("API server shutting down");
        axum_handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN_TIMEOUT));
    });
    let join_handle = tokio::spawn(async move {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::error!(%error, "API server failed"),
            Err(error) => tracing::error!(%error, "API server task failed"),
        }
    });

    Ok(ApiHandle {
        local_addr,
        shutdown_tx,
        join_handle,
    })
}

pub struct ApiHandle {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl ApiHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl ShutdownHandle<()> for ApiHandle {
    fn into_parts(self) -> (oneshot::Sender<()>, JoinHandle<()>) {
        (self.shutdown_tx, self.join_handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_header_is_base64_of_user_and_password() {
        let header = basic_auth_header(&HttpAuthConfig {
            username: "Aladdin".to_string(),
            password: "open sesame".to_string(),
        });
        assert_eq!(header, "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
    }
}
