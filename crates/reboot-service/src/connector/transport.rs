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

//! The SSH operations the connection layer relies on, abstracted so the protocol logic in
//! [`super::SshConnection`] can run against test doubles as well as a real russh client.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::keys::PrivateKey;
use tokio::io::{AsyncRead, AsyncWrite};

pub type PipeReader = Box<dyn AsyncRead + Send + Unpin>;
pub type PipeWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Clone)]
pub enum AuthMethod {
    PublicKey(Arc<PrivateKey>),
    Password(String),
}

impl AuthMethod {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthMethod::PublicKey(_) => "publickey",
            AuthMethod::Password(_) => "password",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Everything needed to dial and authenticate. Methods are tried in order.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user: String,
    pub auth: Vec<AuthMethod>,
    /// Bounds TCP connect plus handshake plus authentication. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("error connecting to {addr}: {error}")]
    Connect { addr: String, error: russh::Error },
    #[error("timed out after {timeout:?} connecting to {addr}")]
    Timeout { addr: String, timeout: Duration },
    #[error("all authentication methods for {user}@{addr} were rejected")]
    AuthenticationFailed { addr: String, user: String },
    #[error("ssh channel error: {0}")]
    Channel(#[from] russh::Error),
    #[error("process exited with status {status}")]
    ExitStatus { status: u32 },
    #[error("command exited with status {status}: {output}")]
    CommandFailed { status: u32, output: String },
    #[error("remote side did not report an exit status")]
    MissingExitStatus,
    #[error("session is already running a command or shell")]
    SessionInUse,
    #[error("no shell was started on this session")]
    ShellNotStarted,
    #[error("{0} pipe already requested")]
    PipeAlreadyTaken(&'static str),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opens authenticated SSH connections.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(
        &self,
        addr: &str,
        config: &ClientConfig,
    ) -> Result<Box<dyn Client>, TransportError>;
}

/// An authenticated SSH connection that can host sessions.
#[async_trait]
pub trait Client: Send + Sync {
    async fn new_session(&self) -> Result<Box<dyn Session>, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A single SSH channel. Either [`Session::combined_output`] or the pipe/shell/wait sequence is
/// used on a given session, never both.
#[async_trait]
pub trait Session: Send {
    /// Runs `command` and returns stdout and stderr interleaved in arrival order.
    async fn combined_output(&mut self, command: &str) -> Result<Vec<u8>, TransportError>;

    /// Pipes must be requested before [`Session::shell`].
    fn stdin_pipe(&mut self) -> Result<PipeWriter, TransportError>;

    fn stdout_pipe(&mut self) -> Result<PipeReader, TransportError>;

    fn stderr_pipe(&mut self) -> Result<PipeReader, TransportError>;

    async fn shell(&mut self) -> Result<(), TransportError>;

    /// Waits for the shell started by [`Session::shell`] to finish. Fails on a non-zero or
    /// missing exit status.
    async fn wait(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}
