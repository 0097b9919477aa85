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

//! reboot-service - remote power-cycling of fleet nodes
//!
//! Nodes are rebooted either through their BMC (an SSH login with per-BMC credentials from a
//! credential store, followed by a power-cycle command) or through their own operating system
//! (an SSH login as a service account whose login hook reboots the machine). An e2e endpoint
//! checks that a BMC is still reachable with its stored credentials.
//!
//! ## Architecture
//!
//! - [`connector`]: SSH connections, including the interactive-shell workaround for BMCs that
//!   never report an exit status
//! - [`reboot`]: Chooses the connection for a target, reboots it and records the outcome
//! - [`e2e`]: Credential lookup plus login, reported as a prometheus sample
//! - [`web`]: The HTTP API in front of the two above
//! - [`metrics_service`]: Prometheus listener for the reboot counters
//! - [`config`]: Configuration management with TOML file support

pub mod config;
pub mod connector;
pub mod e2e;
pub mod logging;
pub mod metrics;
pub mod metrics_service;
pub mod node;
pub mod reboot;
pub mod web;

use std::net::SocketAddr;
use std::sync::Arc;

use eyre::Context;
use reboot_credentials::{
    CredentialProvider, InMemoryCredentialProvider, VaultCredentialProvider, VaultSettings,
};
use tokio::sync::oneshot;

use crate::config::Config;
use crate::connector::{Connector, SshConnector};
use crate::e2e::{ProbeCollector, ProbeConfig};
use crate::metrics::RebootMetrics;
use crate::reboot::{RebootConfig, RebootHandler};
use crate::web::AppState;

/// Static records from the config file when there are any, vault otherwise.
pub fn make_credential_provider(config: &Config) -> eyre::Result<Arc<dyn CredentialProvider>> {
    if let Some(records) = &config.static_credentials {
        tracing::info!(
            count = records.len(),
            "using credentials from config file instead of vault"
        );
        return Ok(Arc::new(InMemoryCredentialProvider::from_records(
            records.iter().cloned(),
        )));
    }

    let vault = &config.vault;
    let provider = VaultCredentialProvider::new(VaultSettings {
        address: vault.address.clone(),
        token: vault.token()?,
        mount: vault.mount.clone(),
        namespace: vault.namespace.clone(),
    })
    .with_context(|| format!("Error creating vault client for {}", vault.address))?;
    Ok(Arc::new(provider))
}

/// Starts the API and metrics listeners with the given collaborators.
pub async fn spawn_with(
    config: Arc<Config>,
    credentials: Arc<dyn CredentialProvider>,
    connector: Arc<dyn Connector>,
) -> eyre::Result<SpawnHandle> {
    let metrics = Arc::new(RebootMetrics::new());
    let state = AppState {
        reboot: Arc::new(RebootHandler::new(
            RebootConfig::from(config.as_ref()),
            credentials.clone(),
            connector.clone(),
            metrics.clone(),
        )),
        probe: Arc::new(ProbeCollector::new(
            ProbeConfig::from(config.as_ref()),
            credentials,
            connector,
        )),
    };

    let metrics_handle = metrics_service::spawn(config.metrics_address, metrics).await?;
    let api_handle = web::spawn(&config, state).await?;
    Ok(SpawnHandle {
        api_handle,
        metrics_handle,
    })
}

/// Starts reboot-service as configured: vault (or static) credentials and real SSH.
pub async fn spawn(config: Arc<Config>) -> eyre::Result<SpawnHandle> {
    let credentials = make_credential_provider(&config)?;
    spawn_with(config, credentials, Arc::new(SshConnector::new())).await
}

pub struct SpawnHandle {
    api_handle: web::ApiHandle,
    metrics_handle: metrics_service::MetricsHandle,
}

impl SpawnHandle {
    pub fn api_addr(&self) -> SocketAddr {
        self.api_handle.local_addr()
    }

    pub fn metrics_addr(&self) -> SocketAddr {
        self.metrics_handle.local_addr()
    }

    pub async fn shutdown_and_wait(self) {
        self.api_handle.shutdown_and_wait().await;
        self.metrics_handle.shutdown_and_wait().await;
    }
}

/// Convenience trait for a task with a shutdown handle (in the form of a [`oneshot::Sender<()>`])
///
/// The shutdown handle must be treated such that dropping it means "shut down now", (because any
/// call which is awaiting the channel will immediately return.) By convention, dropping the
/// channel and sending the shutdown message mean the same thing.
pub trait ShutdownHandle<R> {
    fn into_parts(self) -> (oneshot::Sender<()>, tokio::task::JoinHandle<R>);

    fn shutdown_and_wait(self) -> impl std::future::Future<Output = R> + Send
    where
        Self: Send + Sized,
        R: Send,
    {
        async move {
            let (shutdown_tx, join_handle) = self.into_parts();
            // Let the shutdown handle drop, which causes any reads to finish (semantically the same as
            // sending an empty tuple over the channel, both mean "shut down now").
            std::mem::drop(shutdown_tx);
            join_handle.await.expect("task panicked")
        }
    }
}
