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
use std::time::Duration;

use async_trait::async_trait;
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use vaultrs::kv2;

use crate::{CredentialProvider, Credentials, CredentialsError};

const VAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct VaultSettings {
    pub address: String,
    pub token: String,
    /// KV v2 mount the records live under.
    pub mount: String,
    /// Path prefix inside the mount, so several services can share one mount.
    pub namespace: String,
}

/// Credential store backed by a Vault KV v2 secrets engine. Each record is one secret at
/// `{namespace}/{hostname}`.
pub struct VaultCredentialProvider {
    client: VaultClient,
    mount: String,
    namespace: String,
}

impl VaultCredentialProvider {
    pub fn new(settings: VaultSettings) -> eyre::Result<Self> {
        let client_settings = VaultClientSettingsBuilder::default()
            .address(settings.address)
            .token(settings.token)
            .timeout(Some(VAULT_REQUEST_TIMEOUT))
            .build()?;
        Ok(Self {
            client: VaultClient::new(client_settings)?,
            mount: settings.mount,
            namespace: settings.namespace,
        })
    }

    fn secret_path(&self, hostname: &str) -> String {
        secret_path(&self.namespace, hostname)
    }
}

fn secret_path(namespace: &str, hostname: &str) -> String {
    let namespace = namespace.trim_matches('/');
    if namespace.is_empty() {
        hostname.to_string()
    } else {
        format!("{namespace}/{hostname}")
    }
}

fn backend_error(hostname: &str, err: ClientError) -> CredentialsError {
    CredentialsError::Backend {
        hostname: hostname.to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl CredentialProvider for VaultCredentialProvider {
    async fn find_credentials(&self, hostname: &str) -> Result<Credentials, CredentialsError> {
        match kv2::read(&self.client, &self.mount, &self.secret_path(hostname)).await {
            Ok(credentials) => Ok(credentials),
            Err(ClientError::APIError { code: 404, .. }) => Err(CredentialsError::NotFound {
                hostname: hostname.to_string(),
            }),
            Err(err) => {
                tracing::error!(%hostname, error = %err, "Error getting credentials");
                Err(backend_error(hostname, err))
            }
        }
    }

    async fn add_credentials(&self, credentials: Credentials) -> Result<(), CredentialsError> {
        let path = self.secret_path(&credentials.hostname);
        let _secret_version_metadata = kv2::set(&self.client, &self.mount, &path, &credentials)
            .await
            .map_err(|err| {
                tracing::error!(hostname = %credentials.hostname, error = %err, "Error setting credentials");
                backend_error(&credentials.hostname, err)
            })?;
        Ok(())
    }

    async fn delete_credentials(&self, hostname: &str) -> Result<(), CredentialsError> {
        match kv2::delete_metadata(&self.client, &self.mount, &self.secret_path(hostname)).await {
            Ok(()) => Ok(()),
            Err(ClientError::APIError { code: 404, .. }) => Err(CredentialsError::NotFound {
                hostname: hostname.to_string(),
            }),
            Err(err) => {
                tracing::error!(%hostname, error = %err, "Error deleting credentials");
                Err(backend_error(hostname, err))
            }
        }
    }
}
