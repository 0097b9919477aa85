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

//! [`Dialer`] implementation backed by russh.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use russh::client::{AuthResult, GexParams, KeyboardInteractiveAuthResponse, Msg};
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey};
use russh::{Channel, ChannelMsg, ChannelReadHalf, ChannelWriteHalf};
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::io::StreamReader;

use super::transport::{
    AuthMethod, Client, ClientConfig, Dialer, PipeReader, PipeWriter, Session, TransportError,
};

static RUSSH_CLIENT_CONFIG: LazyLock<Arc<russh::client::Config>> =
    LazyLock::new(russh_client_config);

const PIPE_BUFFER_SIZE: usize = 32 * 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct RusshDialer;

#[async_trait]
impl Dialer for RusshDialer {
    async fn dial(
        &self,
        addr: &str,
        config: &ClientConfig,
    ) -> Result<Box<dyn Client>, TransportError> {
        let handle = match config.timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect_and_authenticate(addr, config))
                .await
                .map_err(|_| TransportError::Timeout {
                    addr: addr.to_string(),
                    timeout,
                })??,
            None => connect_and_authenticate(addr, config).await?,
        };
        Ok(Box::new(RusshClient { handle }))
    }
}

async fn connect_and_authenticate(
    addr: &str,
    ClientConfig { user, auth, .. }: &ClientConfig,
) -> Result<russh::client::Handle<Handler>, TransportError> {
    let mut client = russh::client::connect(RUSSH_CLIENT_CONFIG.clone(), addr, Handler)
        .await
        .map_err(|error| TransportError::Connect {
            addr: addr.to_string(),
            error,
        })?;

    for method in auth {
        let authenticated = match method {
            AuthMethod::PublicKey(key) => {
                let key = PrivateKeyWithHashAlg::new(key.clone(), Some(HashAlg::Sha512));
                matches!(
                    client.authenticate_publickey(user, key).await?,
                    AuthResult::Success
                )
            }
            AuthMethod::Password(password) => {
                matches!(
                    client.authenticate_password(user, password).await?,
                    AuthResult::Success
                ) || authenticate_keyboard_interactive(&mut client, user, password).await?
            }
        };
        if authenticated {
            tracing::debug!(%addr, %user, method = method.kind(), "authentication succeeded");
            return Ok(client);
        }
        tracing::debug!(%addr, %user, method = method.kind(), "authentication failed");
    }

    Err(TransportError::AuthenticationFailed {
        addr: addr.to_string(),
        user: user.clone(),
    })
}

// Some controllers only accept the password through keyboard-interactive prompts.
async fn authenticate_keyboard_interactive(
    client: &mut russh::client::Handle<Handler>,
    user: &str,
    password: &str,
) -> Result<bool, TransportError> {
    let mut response = client
        .authenticate_keyboard_interactive_start(user, None)
        .await?;
    loop {
        match &response {
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                response = client
                    .authenticate_keyboard_interactive_respond(
                        prompts.iter().map(|_| password.to_string()).collect(),
                    )
                    .await?;
            }
            KeyboardInteractiveAuthResponse::Success => return Ok(true),
            KeyboardInteractiveAuthResponse::Failure { .. } => return Ok(false),
        }
    }
}

struct Handler;

impl russh::client::Handler for Handler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        // TODO: known_hosts support?
        Ok(true)
    }
}

fn russh_client_config() -> Arc<russh::client::Config> {
    let russh_config = russh::client::Config {
        // Some BMC's use a Diffie-Hellman group size of 2048, which is not allowed by default.
        gex: GexParams::new(2048, 8192, 8192)
            .expect("BUG: static DH group parameters must be valid"),
        keepalive_interval: Some(Duration::from_secs(60)),
        keepalive_max: 2,
        ..Default::default()
    };
    Arc::new(russh_config)
}

struct RusshClient {
    handle: russh::client::Handle<Handler>,
}

#[async_trait]
impl Client for RusshClient {
    async fn new_session(&self) -> Result<Box<dyn Session>, TransportError> {
        let channel = self.handle.channel_open_session().await?;
        Ok(Box::new(RusshSession::new(channel)))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}

/// One russh channel. Pipes are plain in-process streams; once the shell starts a pump task moves
/// bytes between them and the channel until the remote side closes it.
struct RusshSession {
    channel: Option<Channel<Msg>>,
    stdin: Option<DuplexStream>,
    stdout: Option<mpsc::UnboundedSender<Bytes>>,
    stderr: Option<mpsc::UnboundedSender<Bytes>>,
    pump: Option<JoinHandle<Option<u32>>>,
}

impl RusshSession {
    fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel: Some(channel),
            stdin: None,
            stdout: None,
            stderr: None,
            pump: None,
        }
    }
}

fn output_pipe(
    slot: &mut Option<mpsc::UnboundedSender<Bytes>>,
    name: &'static str,
) -> Result<PipeReader, TransportError> {
    if slot.is_some() {
        return Err(TransportError::PipeAlreadyTaken(name));
    }
    let (tx, rx) = mpsc::unbounded_channel();
    *slot = Some(tx);
    let stream = UnboundedReceiverStream::new(rx).map(Ok::<_, std::io::Error>);
    Ok(Box::new(StreamReader::new(stream)))
}

#[async_trait]
impl Session for RusshSession {
    async fn combined_output(&mut self, command: &str) -> Result<Vec<u8>, TransportError> {
        let mut channel = self.channel.take().ok_or(TransportError::SessionInUse)?;
        channel.exec(true, command).await?;

        let mut output = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } | ChannelMsg::ExtendedData { data, .. } => {
                    output.extend_from_slice(&data)
                }
                ChannelMsg::ExitStatus {
                    exit_status: status,
                } => exit_status = Some(status),
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        match exit_status {
            Some(0) => Ok(output),
            Some(status) => Err(TransportError::CommandFailed {
                status,
                output: String::from_utf8_lossy(&output).into_owned(),
            }),
            None => {
                tracing::debug!(%command, "channel closed without an exit status");
                Ok(output)
            }
        }
    }

    fn stdin_pipe(&mut self) -> Result<PipeWriter, TransportError> {
        if self.stdin.is_some() {
            return Err(TransportError::PipeAlreadyTaken("stdin"));
        }
        let (local, remote) = tokio::io::duplex(PIPE_BUFFER_SIZE);
        self.stdin = Some(remote);
        Ok(Box::new(local))
    }

    fn stdout_pipe(&mut self) -> Result<PipeReader, TransportError> {
        output_pipe(&mut self.stdout, "stdout")
    }

    fn stderr_pipe(&mut self) -> Result<PipeReader, TransportError> {
        output_pipe(&mut self.stderr, "stderr")
    }

    async fn shell(&mut self) -> Result<(), TransportError> {
        let channel = self.channel.take().ok_or(TransportError::SessionInUse)?;
        channel.request_shell(true).await?;
        let (read_half, write_half) = channel.split();
        self.pump = Some(tokio::spawn(pump_shell(
            read_half,
            write_half,
            self.stdin.take(),
            self.stdout.take(),
            self.stderr.take(),
        )));
        Ok(())
    }

    async fn wait(&mut self) -> Result<(), TransportError> {
        let pump = self.pump.take().ok_or(TransportError::ShellNotStarted)?;
        match pump.await.map_err(std::io::Error::other)? {
            Some(0) => Ok(()),
            Some(status) => Err(TransportError::ExitStatus { status }),
            None => Err(TransportError::MissingExitStatus),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(channel) = self.channel.take() {
            channel.close().await?;
        }
        Ok(())
    }
}

async fn read_stdin(stdin: &mut Option<DuplexStream>, buf: &mut [u8]) -> std::io::Result<usize> {
    match stdin {
        Some(stdin) => stdin.read(buf).await,
        None => std::future::pending().await,
    }
}

fn forward(pipe: &Option<mpsc::UnboundedSender<Bytes>>, data: &[u8]) {
    if let Some(pipe) = pipe {
        // The reader may already be gone; output nobody reads is dropped.
        let _ = pipe.send(Bytes::copy_from_slice(data));
    }
}

/// Moves stdin to the channel and channel output to stdout/stderr until the channel closes.
/// Returns the exit status if the remote side sent one. Dropping the output senders on return
/// signals EOF to the readers.
async fn pump_shell(
    mut read_half: ChannelReadHalf,
    write_half: ChannelWriteHalf<Msg>,
    mut stdin: Option<DuplexStream>,
    stdout: Option<mpsc::UnboundedSender<Bytes>>,
    stderr: Option<mpsc::UnboundedSender<Bytes>>,
) -> Option<u32> {
    let mut exit_status = None;
    let mut buf = vec![0u8; PIPE_BUFFER_SIZE];
    loop {
        tokio::select! {
            res = read_stdin(&mut stdin, &mut buf) => match res {
                Ok(0) => {
                    let _ = write_half.eof().await;
                    stdin = None;
                }
                Ok(n) => {
                    if let Err(error) = write_half.data(&buf[..n]).await {
                        tracing::debug!(%error, "error writing to shell, dropping stdin");
                        stdin = None;
                    }
                }
                Err(error) => {
                    tracing::debug!(%error, "error reading shell stdin");
                    stdin = None;
                }
            },
            msg = read_half.wait() => match msg {
                Some(ChannelMsg::Data { data }) => forward(&stdout, &data),
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => forward(&stderr, &data),
                Some(ChannelMsg::ExitStatus { exit_status: status }) => exit_status = Some(status),
                Some(ChannelMsg::Close) | None => break,
                Some(msg) => tracing::trace!("message from shell channel: {msg:?}"),
            },
        }
    }
    exit_status
}
