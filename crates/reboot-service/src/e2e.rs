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

//! End-to-end probe: can we reach and log into a node's BMC right now? Run once per scrape.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reboot_credentials::CredentialProvider;

use crate::config::Config;
use crate::connector::{ConnectionConfig, ConnectionType, Connector};
use crate::node::{NodeIdentity, NodeParseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    CredentialsNotFound,
    ConnectionFailed,
}

impl ProbeOutcome {
    /// The probe itself always ran; failures are carried by `reason`.
    pub fn status(&self) -> &'static str {
        "ok"
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ProbeOutcome::Success => "success",
            ProbeOutcome::CredentialsNotFound => "credentials_not_found",
            ProbeOutcome::ConnectionFailed => "connection_failed",
        }
    }

    pub fn value(&self) -> f64 {
        match self {
            ProbeOutcome::Success => 1.0,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    pub bmc_port: u16,
    /// Kept below the scraper's own timeout so a dead BMC still yields a sample.
    pub connect_timeout: Duration,
    pub credentials_timeout: Duration,
    pub private_key_path: Option<PathBuf>,
    pub fleet_domain: String,
}

impl From<&Config> for ProbeConfig {
    fn from(config: &Config) -> Self {
        Self {
            bmc_port: config.bmc_port,
            connect_timeout: config.probe_connect_timeout,
            credentials_timeout: config.credentials_timeout,
            private_key_path: config.private_key_path.clone(),
            fleet_domain: config.fleet_domain.clone(),
        }
    }
}

/// Result of probing one target: the BMC hostname used as the `target` label, and the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub bmc_hostname: String,
    pub outcome: ProbeOutcome,
}

pub struct ProbeCollector {
    config: ProbeConfig,
    credentials: Arc<dyn CredentialProvider>,
    connector: Arc<dyn Connector>,
}

impl ProbeCollector {
    pub fn new(
        config: ProbeConfig,
        credentials: Arc<dyn CredentialProvider>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config,
            credentials,
            connector,
        }
    }

    pub async fn probe(&self, target: &str) -> Result<ProbeReport, NodeParseError> {
        let node = NodeIdentity::parse(target)?;
        let bmc_hostname = node.bmc_hostname(&self.config.fleet_domain);
        let outcome = self.probe_bmc(&bmc_hostname).await;
        tracing::debug!(%bmc_hostname, reason = outcome.reason(), "e2e probe finished");
        Ok(ProbeReport {
            bmc_hostname,
            outcome,
        })
    }

    async fn probe_bmc(&self, bmc_hostname: &str) -> ProbeOutcome {
        let creds = match self
            .credentials
            .find_credentials_within(bmc_hostname, self.config.credentials_timeout)
            .await
        {
            Ok(creds) => creds,
            Err(error) => {
                tracing::warn!(%bmc_hostname, %error, "e2e probe cannot retrieve credentials");
                return ProbeOutcome::CredentialsNotFound;
            }
        };

        let mut config = ConnectionConfig::new(
            ConnectionType::Bmc,
            creds.address,
            self.config.bmc_port,
            creds.username,
        )
        .with_password(creds.password)
        .with_timeout(self.config.connect_timeout);
        if let Some(path) = &self.config.private_key_path {
            config = config.with_private_key(path);
        }

        match self.connector.new_connection(&config).await {
            Ok(mut conn) => {
                if let Err(error) = conn.close().await {
                    tracing::warn!(%bmc_hostname, %error, "e2e probe cannot close connection");
                }
                ProbeOutcome::Success
            }
            Err(error) => {
                tracing::warn!(%bmc_hostname, %error, "e2e probe cannot connect");
                ProbeOutcome::ConnectionFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use reboot_credentials::{Credentials, InMemoryCredentialProvider};

    use super::*;
    use crate::connector::SshConnector;
    use crate::connector::test_support::MockTransport;

    fn collector(transport: &MockTransport, records: Vec<Credentials>) -> ProbeCollector {
        ProbeCollector::new(
            ProbeConfig {
                bmc_port: 806,
                connect_timeout: Duration::from_secs(45),
                credentials_timeout: Duration::from_secs(10),
                private_key_path: None,
                fleet_domain: "measurement-lab.org".to_string(),
            },
            Arc::new(InMemoryCredentialProvider::from_records(records)),
            Arc::new(SshConnector::with_dialer(Arc::new(transport.clone()))),
        )
    }

    fn credentials() -> Credentials {
        Credentials {
            hostname: "mlab3d.abc01.measurement-lab.org".to_string(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            model: "DRAC".to_string(),
            address: "192.0.2.30".to_string(),
        }
    }

    #[tokio::test]
    async fn successful_probe_connects_and_closes_without_commands() {
        let transport = MockTransport::new().panic_on_new_session();
        let report = collector(&transport, vec![credentials()])
            .probe("mlab3.abc01")
            .await
            .unwrap();

        assert_eq!(report.bmc_hostname, "mlab3d.abc01.measurement-lab.org");
        assert_eq!(report.outcome, ProbeOutcome::Success);
        assert_eq!(transport.dials()[0].timeout, Some(Duration::from_secs(45)));
        assert_eq!(transport.dials()[0].addr, "192.0.2.30:806");
        assert_eq!(transport.clients_closed(), 1);
    }

    #[tokio::test]
    async fn missing_credentials_short_circuit() {
        let transport = MockTransport::new();
        let report = collector(&transport, vec![])
            .probe("mlab3.abc01")
            .await
            .unwrap();

        assert_eq!(report.outcome, ProbeOutcome::CredentialsNotFound);
        assert!(transport.dials().is_empty());
    }

    #[tokio::test]
    async fn unreachable_bmc_is_connection_failed() {
        let transport = MockTransport::new().fail_dial();
        let report = collector(&transport, vec![credentials()])
            .probe("mlab3d.abc01.measurement-lab.org")
            .await
            .unwrap();

        assert_eq!(report.outcome, ProbeOutcome::ConnectionFailed);
        assert_eq!(report.outcome.value(), 0.0);
    }

    #[tokio::test]
    async fn invalid_target_is_rejected() {
        let transport = MockTransport::new();
        assert!(collector(&transport, vec![]).probe("nope").await.is_err());
    }
}
