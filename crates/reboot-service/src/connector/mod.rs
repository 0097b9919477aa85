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

//! SSH connections to fleet nodes and their management controllers.
//!
//! [`Connector`] dials and authenticates, handing back a [`Connection`] that can run commands.
//! The controllers reachable over SSH are not well-behaved shells: some never send an exit
//! status, and some only produce output through an interactive shell. [`Connection`] hides those
//! quirks from the reboot and probe code.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

mod ssh_client;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod transport;

pub use ssh_client::RusshDialer;
use transport::{AuthMethod, Client, ClientConfig, Dialer, Session, TransportError};

/// Power-cycles a Dell iDRAC.
pub const BMC_REBOOT_COMMAND: &str = "racadm serveraction powercycle";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    #[default]
    Unspecified,
    Bmc,
    Host,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionType::Unspecified => "unspecified",
            ConnectionType::Bmc => "bmc",
            ConnectionType::Host => "host",
        };
        f.write_str(s)
    }
}

/// Where and how to connect. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    connection_type: ConnectionType,
    hostname: String,
    port: u16,
    username: String,
    password: String,
    private_key_path: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl ConnectionConfig {
    pub fn new(
        connection_type: ConnectionType,
        hostname: impl Into<String>,
        port: u16,
        username: impl Into<String>,
    ) -> Self {
        Self {
            connection_type,
            hostname: hostname.into(),
            port,
            username: username.into(),
            password: String::new(),
            private_key_path: None,
            timeout: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// An empty path means no key.
    pub fn with_private_key(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.private_key_path = (!path.as_os_str().is_empty()).then_some(path);
        self
    }

    /// A zero timeout means no timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn private_key_path(&self) -> Option<&Path> {
        self.private_key_path.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Omit the password
        f.debug_struct("ConnectionConfig")
            .field("connection_type", &self.connection_type)
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("private_key_path", &self.private_key_path)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConnectorError {
    #[error("cannot parse private key {}: {reason}", path.display())]
    Auth { path: PathBuf, reason: String },
    #[error("connection type is not specified")]
    UnspecifiedConnection,
    #[error("invalid port {port} for {hostname}")]
    InvalidPort { hostname: String, port: u16 },
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: TransportError,
    },
    #[error("cannot open session: {0}")]
    Session(#[source] TransportError),
    #[error("command {command:?} failed: {source}")]
    Command {
        command: String,
        source: TransportError,
    },
    #[error("connection is closed")]
    Closed,
    #[error("error closing connection to {addr}: {source}")]
    Close {
        addr: String,
        source: TransportError,
    },
}

/// An open, authenticated connection to one node or controller.
#[async_trait]
pub trait Connection: Send {
    /// Runs `command` in a fresh session and returns combined stdout and stderr.
    async fn exec(&mut self, command: &str) -> Result<String, ConnectorError>;

    /// Runs `command` through an interactive shell, followed by `exit`. For controllers that
    /// only answer inside a shell, or never report an exit status. The shell's exit status is
    /// not checked.
    async fn exec_interactive(&mut self, command: &str) -> Result<String, ConnectorError>;

    /// Issues the reboot appropriate to the connection type.
    async fn reboot(&mut self) -> Result<String, ConnectorError>;

    /// Terminates the connection. Closing an already closed connection does nothing.
    async fn close(&mut self) -> Result<(), ConnectorError>;
}

/// Factory for [`Connection`]s.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn new_connection(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn Connection>, ConnectorError>;
}

/// [`Connector`] speaking SSH through a [`Dialer`].
pub struct SshConnector {
    dialer: Arc<dyn Dialer>,
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl SshConnector {
    pub fn new() -> Self {
        Self::with_dialer(Arc::new(RusshDialer))
    }

    pub fn with_dialer(dialer: Arc<dyn Dialer>) -> Self {
        Self { dialer }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn new_connection(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn Connection>, ConnectorError> {
        if config.connection_type == ConnectionType::Unspecified {
            return Err(ConnectorError::UnspecifiedConnection);
        }
        if config.port == 0 {
            return Err(ConnectorError::InvalidPort {
                hostname: config.hostname.clone(),
                port: config.port,
            });
        }

        let client_config = ClientConfig {
            user: config.username.clone(),
            auth: auth_methods(config).await?,
            timeout: config.timeout,
        };
        let addr = config.addr();
        tracing::debug!(%addr, connection_type = %config.connection_type, "connecting");
        let client = self
            .dialer
            .dial(&addr, &client_config)
            .await
            .map_err(|source| ConnectorError::Connect { addr, source })?;

        Ok(Box::new(SshConnection::new(config.clone(), client)))
    }
}

/// Public key first when a readable key is configured, then the password. A key that cannot be
/// read is skipped; a key that can be read but not parsed is an error.
async fn auth_methods(config: &ConnectionConfig) -> Result<Vec<AuthMethod>, ConnectorError> {
    let mut methods = Vec::with_capacity(2);
    if let Some(path) = &config.private_key_path {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => {
                let key = russh::keys::decode_secret_key(&contents, None).map_err(|error| {
                    tracing::error!(path = %path.display(), %error, "cannot parse private key");
                    ConnectorError::Auth {
                        path: path.clone(),
                        reason: error.to_string(),
                    }
                })?;
                methods.push(AuthMethod::PublicKey(Arc::new(key)));
            }
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    %error,
                    "cannot read private key, falling back to password authentication"
                );
            }
        }
    }
    methods.push(AuthMethod::Password(config.password.clone()));
    Ok(methods)
}

/// [`Connection`] over one SSH client. Every command gets its own session.
pub struct SshConnection {
    config: ConnectionConfig,
    client: Option<Box<dyn Client>>,
}

impl SshConnection {
    pub fn new(config: ConnectionConfig, client: Box<dyn Client>) -> Self {
        Self {
            config,
            client: Some(client),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn new_session(&self) -> Result<Box<dyn Session>, ConnectorError> {
        let client = self.client.as_deref().ok_or(ConnectorError::Closed)?;
        client.new_session().await.map_err(|error| {
            tracing::error!(addr = %self.config.addr(), %error, "cannot open session");
            ConnectorError::Session(error)
        })
    }
}

async fn close_session(session: &mut dyn Session) {
    if let Err(error) = session.close().await {
        tracing::debug!(%error, "error closing session");
    }
}

async fn run_interactive(session: &mut dyn Session, command: &str) -> Result<Vec<u8>, TransportError> {
    let mut stdin = session.stdin_pipe()?;
    let stdout = session.stdout_pipe()?;
    let stderr = session.stderr_pipe()?;
    session.shell().await?;

    stdin.write_all(format!("{command}\n").as_bytes()).await?;
    // Without this the shell never exits on controllers that don't close it themselves.
    stdin.write_all(b"exit\n").await?;
    stdin.flush().await?;

    // Exit status is unreliable on these controllers; only the exit handshake matters.
    if let Err(error) = session.wait().await {
        tracing::debug!(%error, "ignoring interactive shell exit status");
    }

    let mut output = Vec::new();
    stdout.chain(stderr).read_to_end(&mut output).await?;
    Ok(output)
}

#[async_trait]
impl Connection for SshConnection {
    async fn exec(&mut self, command: &str) -> Result<String, ConnectorError> {
        let mut session = self.new_session().await?;
        let result = session.combined_output(command).await;
        close_session(session.as_mut()).await;

        let output = result.map_err(|source| {
            tracing::error!(addr = %self.config.addr(), %command, error = %source, "command failed");
            ConnectorError::Command {
                command: command.to_string(),
                source,
            }
        })?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    async fn exec_interactive(&mut self, command: &str) -> Result<String, ConnectorError> {
        let mut session = self.new_session().await?;
        let result = run_interactive(session.as_mut(), command).await;
        close_session(session.as_mut()).await;

        let output = result.map_err(|source| {
            tracing::error!(addr = %self.config.addr(), %command, error = %source, "interactive command failed");
            ConnectorError::Command {
                command: command.to_string(),
                source,
            }
        })?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    async fn reboot(&mut self) -> Result<String, ConnectorError> {
        match self.config.connection_type {
            // The reboot user's login hook does the work, no command needed.
            ConnectionType::Host => self.exec("").await,
            ConnectionType::Bmc => self.exec(BMC_REBOOT_COMMAND).await,
            ConnectionType::Unspecified => Err(ConnectorError::UnspecifiedConnection),
        }
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        let Some(mut client) = self.client.take() else {
            return Ok(());
        };
        client.close().await.map_err(|source| {
            tracing::error!(addr = %self.config.addr(), error = %source, "error closing connection");
            ConnectorError::Close {
                addr: self.config.addr(),
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MockTransport;
    use super::*;

    const VALID_KEY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/valid_ed25519_key");
    const CORRUPT_KEY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/corrupt_key");

    fn bmc_config() -> ConnectionConfig {
        ConnectionConfig::new(ConnectionType::Bmc, "mlab1d.lga0t.measurement-lab.org", 806, "admin")
            .with_password("secret")
    }

    async fn connect(transport: &MockTransport, config: &ConnectionConfig) -> Box<dyn Connection> {
        SshConnector::with_dialer(Arc::new(transport.clone()))
            .new_connection(config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn exec_returns_output_and_uses_one_session() {
        let transport = MockTransport::new().with_output("uptime", "up 3 days\n");
        let mut conn = connect(&transport, &bmc_config()).await;

        assert_eq!(conn.exec("uptime").await.unwrap(), "up 3 days\n");
        assert_eq!(transport.sessions_opened(), 1);
        assert_eq!(transport.sessions_closed(), 1);
        assert_eq!(transport.commands(), vec!["uptime".to_string()]);
    }

    #[tokio::test]
    async fn exec_reports_session_failure() {
        let transport = MockTransport::new().fail_new_session();
        let mut conn = connect(&transport, &bmc_config()).await;

        let err = conn.exec("uptime").await.unwrap_err();
        assert!(matches!(err, ConnectorError::Session(_)), "{err:?}");
    }

    #[tokio::test]
    async fn exec_reports_command_failure() {
        let transport = MockTransport::new();
        let mut conn = connect(&transport, &bmc_config()).await;

        let err = conn.exec("no-such-command").await.unwrap_err();
        assert!(matches!(err, ConnectorError::Command { .. }), "{err:?}");
        assert_eq!(transport.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn bmc_reboot_runs_powercycle() {
        let transport = MockTransport::new().with_output(BMC_REBOOT_COMMAND, "Server power operation successful\n");
        let mut conn = connect(&transport, &bmc_config()).await;

        let output = conn.reboot().await.unwrap();
        assert_eq!(output, "Server power operation successful\n");
        assert_eq!(transport.commands(), vec![BMC_REBOOT_COMMAND.to_string()]);
    }

    #[tokio::test]
    async fn host_reboot_runs_empty_command() {
        let transport = MockTransport::new().with_output("", "");
        let config = ConnectionConfig::new(ConnectionType::Host, "mlab1.lga0t.measurement-lab.org", 22, "reboot-api");
        let mut conn = connect(&transport, &config).await;

        conn.reboot().await.unwrap();
        assert_eq!(transport.commands(), vec![String::new()]);
    }

    #[tokio::test]
    async fn unspecified_reboot_never_opens_a_session() {
        let transport = MockTransport::new().panic_on_new_session();
        let config = ConnectionConfig::new(ConnectionType::Unspecified, "h", 22, "u");
        let client = transport.client();
        let mut conn = SshConnection::new(config, client);

        let err = conn.reboot().await.unwrap_err();
        assert!(matches!(err, ConnectorError::UnspecifiedConnection));
    }

    #[tokio::test]
    async fn unspecified_connection_is_rejected_before_dialing() {
        let transport = MockTransport::new();
        let config = ConnectionConfig::new(ConnectionType::Unspecified, "h", 22, "u");
        let err = SshConnector::with_dialer(Arc::new(transport.clone()))
            .new_connection(&config)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectorError::UnspecifiedConnection));
        assert!(transport.dials().is_empty());
    }

    #[tokio::test]
    async fn dial_failure_is_a_connect_error() {
        let transport = MockTransport::new().fail_dial();
        let err = SshConnector::with_dialer(Arc::new(transport.clone()))
            .new_connection(&bmc_config())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectorError::Connect { ref addr, .. } if addr == "mlab1d.lga0t.measurement-lab.org:806"));
    }

    #[tokio::test]
    async fn interactive_exec_returns_echoed_output() {
        let transport = MockTransport::new();
        let mut conn = connect(&transport, &bmc_config()).await;

        assert_eq!(conn.exec_interactive("foo").await.unwrap(), "foo\n");
        assert_eq!(transport.commands(), vec!["foo".to_string(), "exit".to_string()]);
        assert_eq!(transport.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn interactive_exec_appends_stderr_after_stdout() {
        let transport = MockTransport::new().with_stderr_banner("Welcome to the controller\n");
        let mut conn = connect(&transport, &bmc_config()).await;

        assert_eq!(
            conn.exec_interactive("foo").await.unwrap(),
            "foo\nWelcome to the controller\n"
        );
    }

    #[tokio::test]
    async fn interactive_exec_ignores_exit_status() {
        let transport = MockTransport::new().fail_wait();
        let mut conn = connect(&transport, &bmc_config()).await;

        assert_eq!(conn.exec_interactive("foo").await.unwrap(), "foo\n");
    }

    #[tokio::test]
    async fn interactive_exec_reports_session_failure() {
        let transport = MockTransport::new().fail_new_session();
        let mut conn = connect(&transport, &bmc_config()).await;

        let err = conn.exec_interactive("foo").await.unwrap_err();
        assert!(matches!(err, ConnectorError::Session(_)));
    }

    #[tokio::test]
    async fn readable_key_is_offered_before_password() {
        let transport = MockTransport::new();
        let config = bmc_config()
            .with_private_key(VALID_KEY)
            .with_timeout(Duration::from_secs(60));
        connect(&transport, &config).await;

        let dials = transport.dials();
        assert_eq!(dials.len(), 1);
        assert_eq!(dials[0].auth, vec!["publickey", "password"]);
        assert_eq!(dials[0].user, "admin");
        assert_eq!(dials[0].timeout, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn unreadable_key_falls_back_to_password() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let config = bmc_config().with_private_key(dir.path().join("missing_key"));
        connect(&transport, &config).await;

        assert_eq!(transport.dials()[0].auth, vec!["password"]);
    }

    #[tokio::test]
    async fn corrupt_key_fails_without_dialing() {
        let transport = MockTransport::new();
        let config = bmc_config().with_private_key(CORRUPT_KEY);
        let err = SshConnector::with_dialer(Arc::new(transport.clone()))
            .new_connection(&config)
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ConnectorError::Auth { .. }), "{err:?}");
        assert!(transport.dials().is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_reports_errors() {
        let transport = MockTransport::new().fail_close();
        let mut conn = connect(&transport, &bmc_config()).await;

        assert!(matches!(conn.close().await, Err(ConnectorError::Close { .. })));
        conn.close().await.unwrap();
        assert_eq!(transport.clients_closed(), 1);
        assert!(matches!(conn.exec("uptime").await, Err(ConnectorError::Closed)));
    }

    #[test]
    fn builder_normalizes_empty_values() {
        let config = bmc_config().with_private_key("").with_timeout(Duration::ZERO);
        assert_eq!(config.private_key_path(), None);
        assert_eq!(config.timeout(), None);
        assert!(!format!("{config:?}").contains("secret"));
    }
}
