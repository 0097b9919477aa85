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

//! Reboot orchestration: resolve the target, pick the connection, reboot, record the outcome.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::StatusCode;
use reboot_credentials::{CredentialProvider, CredentialsError};

use crate::config::Config;
use crate::connector::{Connection, ConnectionConfig, ConnectionType, Connector, ConnectorError};
use crate::metrics::{RebootMetrics, RebootStatus};
use crate::node::{NodeIdentity, NodeParseError};

/// Response body for a successful host reboot. The host's login hook produces no useful output.
pub const HOST_REBOOT_SUCCESS: &str = "System reboot successful";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RebootMethod {
    #[default]
    Bmc,
    Host,
}

impl RebootMethod {
    /// `host` selects the OS path; anything else, including nothing, means the BMC.
    pub fn from_query(method: Option<&str>) -> Self {
        match method {
            Some("host") => RebootMethod::Host,
            _ => RebootMethod::Bmc,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RebootError {
    #[error(transparent)]
    InvalidTarget(#[from] NodeParseError),
    #[error("cannot find credentials for {hostname}: {source}")]
    CredentialsNotFound {
        hostname: String,
        source: CredentialsError,
    },
    #[error("cannot connect to {hostname}: {source}")]
    Connect {
        hostname: String,
        source: ConnectorError,
    },
    #[error("reboot of {hostname} failed: {source}")]
    RebootCommand {
        hostname: String,
        source: ConnectorError,
    },
}

impl RebootError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RebootError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Settings the orchestrator needs, split out of [`Config`] so tests can build one directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebootConfig {
    pub ssh_port: u16,
    pub bmc_port: u16,
    pub reboot_user: String,
    pub private_key_path: Option<PathBuf>,
    pub bmc_connect_timeout: Duration,
    pub credentials_timeout: Duration,
    pub fleet_domain: String,
}

impl From<&Config> for RebootConfig {
    fn from(config: &Config) -> Self {
        Self {
            ssh_port: config.ssh_port,
            bmc_port: config.bmc_port,
            reboot_user: config.reboot_user.clone(),
            private_key_path: config.private_key_path.clone(),
            bmc_connect_timeout: config.bmc_connect_timeout,
            credentials_timeout: config.credentials_timeout,
            fleet_domain: config.fleet_domain.clone(),
        }
    }
}

pub struct RebootHandler {
    config: RebootConfig,
    credentials: Arc<dyn CredentialProvider>,
    connector: Arc<dyn Connector>,
    metrics: Arc<RebootMetrics>,
}

impl RebootHandler {
    pub fn new(
        config: RebootConfig,
        credentials: Arc<dyn CredentialProvider>,
        connector: Arc<dyn Connector>,
        metrics: Arc<RebootMetrics>,
    ) -> Self {
        Self {
            config,
            credentials,
            connector,
            metrics,
        }
    }

    pub fn metrics(&self) -> &RebootMetrics {
        &self.metrics
    }

    /// Reboots `target` and returns the body to hand back to the caller.
    pub async fn reboot(&self, target: &str, method: RebootMethod) -> Result<String, RebootError> {
        let node = NodeIdentity::parse(target)?;
        match method {
            RebootMethod::Bmc => self.reboot_bmc(&node).await,
            RebootMethod::Host => self.reboot_host(&node).await,
        }
    }

    async fn reboot_bmc(&self, node: &NodeIdentity) -> Result<String, RebootError> {
        let hostname = node.bmc_hostname(&self.config.fleet_domain);
        let creds = self
            .credentials
            .find_credentials_within(&hostname, self.config.credentials_timeout)
            .await
            .map_err(|source| {
                tracing::error!(%hostname, error = %source, "cannot retrieve BMC credentials");
                RebootError::CredentialsNotFound {
                    hostname: hostname.clone(),
                    source,
                }
            })?;

        // BMCs live on a management network; dial the recorded address, not the hostname.
        let mut config =
            ConnectionConfig::new(ConnectionType::Bmc, creds.address, self.config.bmc_port, creds.username)
                .with_password(creds.password)
                .with_timeout(self.config.bmc_connect_timeout);
        if let Some(path) = &self.config.private_key_path {
            config = config.with_private_key(path);
        }

        let mut conn = self
            .connect(&config, node, &hostname, |n, s| self.metrics.record_bmc_reboot(n, s))
            .await?;

        let started = Instant::now();
        let result = conn.reboot().await;
        let elapsed = started.elapsed();
        close(conn.as_mut(), &hostname).await;

        match result {
            Ok(output) => {
                tracing::info!(%hostname, ?elapsed, "BMC reboot succeeded");
                self.metrics.record_bmc_reboot(node, RebootStatus::Ok);
                self.metrics.observe_bmc_reboot_duration(elapsed);
                Ok(output)
            }
            Err(source) => {
                tracing::error!(%hostname, error = %source, "BMC reboot failed");
                self.metrics.record_bmc_reboot(node, RebootStatus::ErrorReboot);
                Err(RebootError::RebootCommand { hostname, source })
            }
        }
    }

    async fn reboot_host(&self, node: &NodeIdentity) -> Result<String, RebootError> {
        let hostname = node.hostname(&self.config.fleet_domain);
        let mut config = ConnectionConfig::new(
            ConnectionType::Host,
            hostname.clone(),
            self.config.ssh_port,
            self.config.reboot_user.clone(),
        );
        if let Some(path) = &self.config.private_key_path {
            config = config.with_private_key(path);
        }

        let mut conn = self
            .connect(&config, node, &hostname, |n, s| self.metrics.record_host_reboot(n, s))
            .await?;

        let result = conn.reboot().await;
        close(conn.as_mut(), &hostname).await;

        match result {
            Ok(_) => {
                tracing::info!(%hostname, "host reboot succeeded");
                self.metrics.record_host_reboot(node, RebootStatus::Ok);
                Ok(HOST_REBOOT_SUCCESS.to_string())
            }
            Err(source) => {
                tracing::error!(%hostname, error = %source, "host reboot failed");
                self.metrics.record_host_reboot(node, RebootStatus::ErrorReboot);
                Err(RebootError::RebootCommand { hostname, source })
            }
        }
    }

    async fn connect(
        &self,
        config: &ConnectionConfig,
        node: &NodeIdentity,
        hostname: &str,
        record: impl Fn(&NodeIdentity, RebootStatus),
    ) -> Result<Box<dyn Connection>, RebootError> {
        self.connector.new_connection(config).await.map_err(|source| {
            tracing::error!(%hostname, addr = %config.addr(), error = %source, "cannot connect");
            record(node, RebootStatus::ErrorConnect);
            RebootError::Connect {
                hostname: hostname.to_string(),
                source,
            }
        })
    }
}

async fn close(conn: &mut dyn Connection, hostname: &str) {
    if let Err(error) = conn.close().await {
        tracing::warn!(%hostname, %error, "error closing connection after reboot");
    }
}
