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

//! Per-node credential records and the providers that store them.
//!
//! A record is keyed by the hostname of the management controller it belongs to. The reboot
//! service only ever reads records; the admin operations exist for the command line.

use core::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod memory;
mod vault;

pub use memory::InMemoryCredentialProvider;
pub use vault::{VaultCredentialProvider, VaultSettings};

/// The secret material needed to log into one management controller.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub hostname: String,
    pub username: String,
    pub password: String,
    pub model: String,
    pub address: String,
}

impl Credentials {
    /// Two-space indented JSON with fields in declaration order, used for audit output.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &"REDACTED")
            .field("model", &self.model)
            .field("address", &self.address)
            .finish()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CredentialsError {
    #[error("credentials for {hostname} not found")]
    NotFound { hostname: String },
    #[error("credential store error for {hostname}: {reason}")]
    Backend { hostname: String, reason: String },
    #[error("credential lookup for {hostname} timed out after {deadline:?}")]
    Timeout { hostname: String, deadline: Duration },
}

impl CredentialsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CredentialsError::NotFound { .. })
    }
}

#[async_trait]
/// Abstract over a credentials provider that functions as a kv map between hostname -> record
///
/// Cancelling an operation is dropping its future. Lookups on request paths go through
/// [`CredentialProvider::find_credentials_within`] so a stuck store can't hold a request forever.
pub trait CredentialProvider: Send + Sync {
    async fn find_credentials(&self, hostname: &str) -> Result<Credentials, CredentialsError>;

    /// [`CredentialProvider::find_credentials`], failing with [`CredentialsError::Timeout`] once
    /// `deadline` has passed.
    async fn find_credentials_within(
        &self,
        hostname: &str,
        deadline: Duration,
    ) -> Result<Credentials, CredentialsError> {
        tokio::time::timeout(deadline, self.find_credentials(hostname))
            .await
            .map_err(|_| CredentialsError::Timeout {
                hostname: hostname.to_string(),
                deadline,
            })?
    }

    async fn add_credentials(&self, credentials: Credentials) -> Result<(), CredentialsError>;

    async fn delete_credentials(&self, hostname: &str) -> Result<(), CredentialsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Credentials {
        Credentials {
            hostname: "mlab1d.lga0t.measurement-lab.org".to_string(),
            username: "admin".to_string(),
            password: "p<a>&ss".to_string(),
            model: "DRAC".to_string(),
            address: "192.0.2.10".to_string(),
        }
    }

    #[test]
    fn json_form_is_indented_and_ordered() {
        let json = sample().to_json_string().unwrap();
        assert_eq!(
            json,
            r#"{
  "hostname": "mlab1d.lga0t.measurement-lab.org",
  "username": "admin",
  "password": "p<a>&ss",
  "model": "DRAC",
  "address": "192.0.2.10"
}"#
        );
    }

    #[test]
    fn debug_output_hides_password() {
        let debug = format!("{:?}", sample());
        assert!(debug.contains("REDACTED"));
        assert!(debug.contains("admin"));
        assert!(!debug.contains("p<a>&ss"));
    }

    /// A store that never answers.
    struct StalledProvider;

    #[async_trait]
    impl CredentialProvider for StalledProvider {
        async fn find_credentials(&self, _hostname: &str) -> Result<Credentials, CredentialsError> {
            std::future::pending().await
        }

        async fn add_credentials(&self, _credentials: Credentials) -> Result<(), CredentialsError> {
            std::future::pending().await
        }

        async fn delete_credentials(&self, _hostname: &str) -> Result<(), CredentialsError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn lookup_fails_once_deadline_passes() {
        let err = StalledProvider
            .find_credentials_within("mlab1d.lga0t.measurement-lab.org", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialsError::Timeout { .. }));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn lookup_within_deadline_returns_record() {
        let provider = InMemoryCredentialProvider::from_records([sample()]);
        let found = provider
            .find_credentials_within(&sample().hostname, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(found, sample());
    }
}
