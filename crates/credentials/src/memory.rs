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
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{CredentialProvider, Credentials, CredentialsError};

/// Credential store held in process memory, used for static records from the config file and
/// in tests.
#[derive(Default)]
pub struct InMemoryCredentialProvider {
    records: RwLock<HashMap<String, Credentials>>,
}

impl InMemoryCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = Credentials>) -> Self {
        let records = records
            .into_iter()
            .map(|c| (c.hostname.clone(), c))
            .collect();
        Self {
            records: RwLock::new(records),
        }
    }
}

#[async_trait]
impl CredentialProvider for InMemoryCredentialProvider {
    async fn find_credentials(&self, hostname: &str) -> Result<Credentials, CredentialsError> {
        self.records
            .read()
            .await
            .get(hostname)
            .cloned()
            .ok_or_else(|| CredentialsError::NotFound {
                hostname: hostname.to_string(),
            })
    }

    async fn add_credentials(&self, credentials: Credentials) -> Result<(), CredentialsError> {
        let _ = self
            .records
            .write()
            .await
            .insert(credentials.hostname.clone(), credentials);
        Ok(())
    }

    async fn delete_credentials(&self, hostname: &str) -> Result<(), CredentialsError> {
        match self.records.write().await.remove(hostname) {
            Some(_) => Ok(()),
            None => Err(CredentialsError::NotFound {
                hostname: hostname.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hostname: &str, password: &str) -> Credentials {
        Credentials {
            hostname: hostname.to_string(),
            username: "admin".to_string(),
            password: password.to_string(),
            model: "DRAC".to_string(),
            address: "192.0.2.10".to_string(),
        }
    }

    #[tokio::test]
    async fn find_returns_not_found_for_unknown_host() {
        let provider = InMemoryCredentialProvider::new();
        let err = provider
            .find_credentials("mlab1d.lga0t.measurement-lab.org")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn add_overwrites_and_delete_removes() {
        let host = "mlab2d.abc01.measurement-lab.org";
        let provider = InMemoryCredentialProvider::from_records([record(host, "first")]);
        assert_eq!(provider.find_credentials(host).await.unwrap().password, "first");

        provider.add_credentials(record(host, "second")).await.unwrap();
        assert_eq!(provider.find_credentials(host).await.unwrap().password, "second");

        provider.delete_credentials(host).await.unwrap();
        assert!(provider.find_credentials(host).await.unwrap_err().is_not_found());
        assert!(provider.delete_credentials(host).await.unwrap_err().is_not_found());
    }
}
