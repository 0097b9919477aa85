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

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use duration_str::deserialize_duration;
use reboot_credentials::Credentials;
use serde::{Deserialize, Serialize, Serializer};

const VAULT_TOKEN_ENV: &str = "VAULT_TOKEN";

#[derive(Debug, Serialize, Deserialize, PartialEq)]
/// Configuration for reboot-service. Fields are documented as comments in the output of [`Config::into_annotated_config_file`].
pub struct Config {
    #[serde(default = "Defaults::listen_address")]
    pub listen_address: SocketAddr,
    #[serde(default = "Defaults::metrics_address")]
    pub metrics_address: SocketAddr,
    #[serde(default = "Defaults::ssh_port")]
    pub ssh_port: u16,
    #[serde(default = "Defaults::bmc_port")]
    pub bmc_port: u16,
    #[serde(default = "Defaults::reboot_user")]
    pub reboot_user: String,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(
        default = "Defaults::bmc_connect_timeout",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub bmc_connect_timeout: Duration,
    #[serde(
        default = "Defaults::probe_connect_timeout",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub probe_connect_timeout: Duration,
    #[serde(
        default = "Defaults::credentials_timeout",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub credentials_timeout: Duration,
    #[serde(default = "Defaults::fleet_domain")]
    pub fleet_domain: String,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub http_auth: Option<HttpAuthConfig>,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default, rename = "credentials")]
    pub static_credentials: Option<Vec<Credentials>>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct VaultConfig {
    #[serde(default = "Defaults::vault_address")]
    pub address: String,
    #[serde(default = "Defaults::vault_mount")]
    pub mount: String,
    #[serde(default = "Defaults::vault_namespace")]
    pub namespace: String,
    /// Falls back to the `VAULT_TOKEN` environment variable when unset.
    #[serde(default)]
    pub token_path: Option<PathBuf>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            address: Defaults::vault_address(),
            mount: Defaults::vault_mount(),
            namespace: Defaults::vault_namespace(),
            token_path: None,
        }
    }
}

impl VaultConfig {
    pub fn token(&self) -> Result<String, ConfigError> {
        if let Some(path) = &self.token_path {
            return std::fs::read_to_string(path)
                .map(|token| token.trim().to_string())
                .map_err(|error| ConfigError::CouldNotRead {
                    path: path.to_string_lossy().to_string(),
                    error,
                });
        }
        std::env::var(VAULT_TOKEN_ENV).map_err(|_| ConfigError::MissingVaultToken)
    }
}

#[derive(Serialize, Deserialize, PartialEq, Clone)]
pub struct HttpAuthConfig {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for HttpAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAuthConfig")
            .field("username", &self.username)
            .field("password", &"REDACTED")
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let cfg = std::fs::read_to_string(path).map_err(|error| ConfigError::CouldNotRead {
            path: path.to_string_lossy().to_string(),
            error,
        })?;
        toml::from_str::<Self>(&cfg).map_err(|error| ConfigError::InvalidToml {
            path: path.to_string_lossy().to_string(),
            error,
        })
    }

    pub fn into_annotated_config_file(self) -> String {
        let Self {
            listen_address,
            metrics_address,
            ssh_port,
            bmc_port,
            reboot_user,
            private_key_path: _,
            bmc_connect_timeout,
            probe_connect_timeout,
            credentials_timeout,
            fleet_domain,
            vault:
                VaultConfig {
                    address: vault_address,
                    mount: vault_mount,
                    namespace: vault_namespace,
                    token_path: _,
                },
            http_auth: _,
            tls: _,
            static_credentials: _,
        } = self;
        let listen_address = listen_address.to_string();
        let metrics_address = metrics_address.to_string();
        let bmc_connect_timeout = format!("{}s", bmc_connect_timeout.as_secs());
        let probe_connect_timeout = format!("{}s", probe_connect_timeout.as_secs());
        let credentials_timeout = format!("{}s", credentials_timeout.as_secs());

        format!(
            r#"
#####
## This is a default config file for reboot-service. Everything in this file is optional: Any
## non-comment line in this file simply represents default values. Commented lines with a single `#`
## represent examples for optional configuration which is not part of the default config.
#####

## What address to listen on for reboot and e2e requests (HTTP)
listen_address = {listen_address:?}

## Address to listen on for prometheus metrics requests (HTTP)
metrics_address = {metrics_address:?}

## SSH port of the nodes' operating systems, used for host reboots
ssh_port = {ssh_port}

## SSH port of the nodes' BMCs, used for BMC reboots and e2e probes
bmc_port = {bmc_port}

## Account to log into the nodes' operating systems as. Logging in is what triggers the reboot.
reboot_user = {reboot_user:?}

## Private key for host reboots. Also offered to BMCs before their password. A key that can't be
## read is skipped, a key that can't be parsed fails the reboot.
# private_key_path = "/etc/reboot-service/id_rsa"

## How long to wait for a BMC to accept a connection and login. BMC firmware is slow.
bmc_connect_timeout = {bmc_connect_timeout:?}

## Same, for e2e probes. Keep this below the prometheus scrape timeout.
probe_connect_timeout = {probe_connect_timeout:?}

## Deadline for looking up BMC credentials in the credential store, for reboots and probes.
credentials_timeout = {credentials_timeout:?}

## Domain suffix of node hostnames, e.g. mlab1.lga0t.<fleet_domain>
fleet_domain = {fleet_domain:?}

## Optional: Require HTTP basic auth on the reboot and e2e endpoints. Without this, anyone who can
## reach listen_address can reboot nodes.
# [http_auth]
# username = "reboot"
# password = "password"

## Optional: Serve HTTPS instead of HTTP.
# [tls]
# cert_path = "/etc/reboot-service/tls.crt"
# key_path = "/etc/reboot-service/tls.key"

## Where BMC credentials are stored. Records live at <mount>/<namespace>/<bmc hostname> in a KV v2
## secrets engine.
[vault]
address = {vault_address:?}
mount = {vault_mount:?}
namespace = {vault_namespace:?}
## Read the vault token from this file. Without it, the VAULT_TOKEN environment variable is used.
# token_path = "/var/run/secrets/vault-token"

## Optional: For development mode, you can hardcode BMC credentials instead of using vault. If any
## are given, vault is not used at all.
# [[credentials]]
# hostname = "mlab1d.lga0t.measurement-lab.org"
# username = "admin"
# password = "password"
# model = "DRAC"
# address = "192.0.2.10"
#
# # [[credentials]]
# # ... more credentials sections can define more than one
"#
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: Defaults::listen_address(),
            metrics_address: Defaults::metrics_address(),
            ssh_port: Defaults::ssh_port(),
            bmc_port: Defaults::bmc_port(),
            reboot_user: Defaults::reboot_user(),
            private_key_path: None,
            bmc_connect_timeout: Defaults::bmc_connect_timeout(),
            probe_connect_timeout: Defaults::probe_connect_timeout(),
            credentials_timeout: Defaults::credentials_timeout(),
            fleet_domain: Defaults::fleet_domain(),
            vault: VaultConfig::default(),
            http_auth: None,
            tls: None,
            static_credentials: None,
        }
    }
}

pub struct Defaults;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config file at {path}: {error}")]
    CouldNotRead { path: String, error: std::io::Error },
    #[error("TOML error reading config file at {path}: {error}")]
    InvalidToml {
        path: String,
        error: toml::de::Error,
    },
    #[error("No vault token: set vault.token_path or the VAULT_TOKEN environment variable")]
    MissingVaultToken,
}

impl Defaults {
    pub fn listen_address() -> SocketAddr {
        "[::]:8080"
            .parse()
            .expect("BUG: default listen_address is invalid")
    }

    pub fn metrics_address() -> SocketAddr {
        "[::]:9600"
            .parse()
            .expect("BUG: default metrics_address is invalid")
    }

    pub fn ssh_port() -> u16 {
        22
    }

    pub fn bmc_port() -> u16 {
        806
    }

    pub fn reboot_user() -> String {
        "reboot-api".to_string()
    }

    pub fn bmc_connect_timeout() -> Duration {
        Duration::from_secs(60)
    }

    pub fn probe_connect_timeout() -> Duration {
        Duration::from_secs(45)
    }

    pub fn credentials_timeout() -> Duration {
        Duration::from_secs(10)
    }

    pub fn fleet_domain() -> String {
        "measurement-lab.org".to_string()
    }

    pub fn vault_address() -> String {
        "http://127.0.0.1:8200".to_string()
    }

    pub fn vault_mount() -> String {
        "secret".to_string()
    }

    pub fn vault_namespace() -> String {
        "reboot-api".to_string()
    }
}

fn serialize_duration<S>(d: &std::time::Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{}s", d.as_secs()))
}
