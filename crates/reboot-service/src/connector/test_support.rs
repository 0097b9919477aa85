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

//! In-process [`Dialer`] double. Everything it is asked to do is recorded so tests can assert on
//! how the connection layer drove the transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;

use super::transport::{
    Client, ClientConfig, Dialer, PipeReader, PipeWriter, Session, TransportError,
};

const PIPE_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialRecord {
    pub addr: String,
    pub user: String,
    pub auth: Vec<&'static str>,
    pub timeout: Option<Duration>,
}

#[derive(Default)]
struct Behavior {
    fail_dial: bool,
    fail_new_session: bool,
    panic_on_new_session: bool,
    fail_close: bool,
    fail_wait: bool,
    outputs: HashMap<String, String>,
    stderr_banner: Option<String>,
}

#[derive(Default)]
struct Record {
    dials: Vec<DialRecord>,
    commands: Vec<String>,
    sessions_opened: usize,
    sessions_closed: usize,
    clients_closed: usize,
}

#[derive(Default)]
struct Inner {
    behavior: Mutex<Behavior>,
    record: Mutex<Record>,
}

/// Scripted transport. Commands run with `combined_output` answer from the output map and fail
/// when unknown; interactive shells echo each line back on stdout until they read `exit`.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(self, f: impl FnOnce(&mut Behavior)) -> Self {
        f(&mut lock(&self.inner.behavior));
        self
    }

    pub fn with_output(self, command: &str, output: &str) -> Self {
        self.configure(|b| {
            let _ = b.outputs.insert(command.to_string(), output.to_string());
        })
    }

    /// Written to stderr as soon as a shell starts.
    pub fn with_stderr_banner(self, banner: &str) -> Self {
        self.configure(|b| b.stderr_banner = Some(banner.to_string()))
    }

    pub fn fail_dial(self) -> Self {
        self.configure(|b| b.fail_dial = true)
    }

    pub fn fail_new_session(self) -> Self {
        self.configure(|b| b.fail_new_session = true)
    }

    /// For asserting that a code path never touches the remote side.
    pub fn panic_on_new_session(self) -> Self {
        self.configure(|b| b.panic_on_new_session = true)
    }

    pub fn fail_close(self) -> Self {
        self.configure(|b| b.fail_close = true)
    }

    /// Shells report a non-zero exit status.
    pub fn fail_wait(self) -> Self {
        self.configure(|b| b.fail_wait = true)
    }

    /// A client as if returned by a successful dial.
    pub fn client(&self) -> Box<dyn Client> {
        Box::new(MockClient {
            transport: self.clone(),
        })
    }

    pub fn dials(&self) -> Vec<DialRecord> {
        lock(&self.inner.record).dials.clone()
    }

    /// Commands passed to `combined_output` and lines written to interactive shells, in order.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.inner.record).commands.clone()
    }

    pub fn sessions_opened(&self) -> usize {
        lock(&self.inner.record).sessions_opened
    }

    pub fn sessions_closed(&self) -> usize {
        lock(&self.inner.record).sessions_closed
    }

    pub fn clients_closed(&self) -> usize {
        lock(&self.inner.record).clients_closed
    }

    fn record(&self, f: impl FnOnce(&mut Record)) {
        f(&mut lock(&self.inner.record))
    }

    fn behavior<T>(&self, f: impl FnOnce(&Behavior) -> T) -> T {
        f(&lock(&self.inner.behavior))
    }
}

fn refused(what: &str) -> TransportError {
    TransportError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        format!("{what} refused by mock transport"),
    ))
}

#[async_trait]
impl Dialer for MockTransport {
    async fn dial(
        &self,
        addr: &str,
        config: &ClientConfig,
    ) -> Result<Box<dyn Client>, TransportError> {
        self.record(|r| {
            r.dials.push(DialRecord {
                addr: addr.to_string(),
                user: config.user.clone(),
                auth: config.auth.iter().map(|m| m.kind()).collect(),
                timeout: config.timeout,
            })
        });
        if self.behavior(|b| b.fail_dial) {
            return Err(refused("connection"));
        }
        Ok(self.client())
    }
}

struct MockClient {
    transport: MockTransport,
}

#[async_trait]
impl Client for MockClient {
    async fn new_session(&self) -> Result<Box<dyn Session>, TransportError> {
        let (panic, fail) = self
            .transport
            .behavior(|b| (b.panic_on_new_session, b.fail_new_session));
        if panic {
            panic!("session opened on a client that must not be used");
        }
        if fail {
            return Err(refused("session"));
        }
        self.transport.record(|r| r.sessions_opened += 1);
        Ok(Box::new(MockSession {
            transport: self.transport.clone(),
            stdin: None,
            stdout: None,
            stderr: None,
            shell: None,
        }))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.transport.record(|r| r.clients_closed += 1);
        if self.transport.behavior(|b| b.fail_close) {
            return Err(refused("close"));
        }
        Ok(())
    }
}

struct MockSession {
    transport: MockTransport,
    // Remote ends of the pipes handed out to the caller.
    stdin: Option<DuplexStream>,
    stdout: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
    shell: Option<JoinHandle<()>>,
}

fn pipe(slot: &mut Option<DuplexStream>, name: &'static str) -> Result<DuplexStream, TransportError> {
    if slot.is_some() {
        return Err(TransportError::PipeAlreadyTaken(name));
    }
    let (local, remote) = tokio::io::duplex(PIPE_BUFFER_SIZE);
    *slot = Some(remote);
    Ok(local)
}

#[async_trait]
impl Session for MockSession {
    async fn combined_output(&mut self, command: &str) -> Result<Vec<u8>, TransportError> {
        self.transport.record(|r| r.commands.push(command.to_string()));
        match self.transport.behavior(|b| b.outputs.get(command).cloned()) {
            Some(output) => Ok(output.into_bytes()),
            None => Err(TransportError::CommandFailed {
                status: 127,
                output: format!("{command}: command not found"),
            }),
        }
    }

    fn stdin_pipe(&mut self) -> Result<PipeWriter, TransportError> {
        Ok(Box::new(pipe(&mut self.stdin, "stdin")?))
    }

    fn stdout_pipe(&mut self) -> Result<PipeReader, TransportError> {
        Ok(Box::new(pipe(&mut self.stdout, "stdout")?))
    }

    fn stderr_pipe(&mut self) -> Result<PipeReader, TransportError> {
        Ok(Box::new(pipe(&mut self.stderr, "stderr")?))
    }

    async fn shell(&mut self) -> Result<(), TransportError> {
        if self.shell.is_some() {
            return Err(TransportError::SessionInUse);
        }
        let transport = self.transport.clone();
        let banner = transport.behavior(|b| b.stderr_banner.clone());
        let stdin = self.stdin.take();
        let mut stdout = self.stdout.take();
        let mut stderr = self.stderr.take();

        self.shell = Some(tokio::spawn(async move {
            if let (Some(banner), Some(stderr)) = (banner, stderr.as_mut()) {
                let _ = stderr.write_all(banner.as_bytes()).await;
            }
            drop(stderr);

            let Some(stdin) = stdin else {
                return;
            };
            let mut lines = BufReader::new(stdin).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                transport.record(|r| r.commands.push(line.clone()));
                if line.trim() == "exit" {
                    break;
                }
                if let Some(stdout) = stdout.as_mut() {
                    let _ = stdout.write_all(format!("{line}\n").as_bytes()).await;
                }
            }
        }));
        Ok(())
    }

    async fn wait(&mut self) -> Result<(), TransportError> {
        let shell = self.shell.take().ok_or(TransportError::ShellNotStarted)?;
        shell.await.map_err(std::io::Error::other)?;
        if self.transport.behavior(|b| b.fail_wait) {
            return Err(TransportError::ExitStatus { status: 1 });
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(shell) = self.shell.take() {
            shell.abort();
        }
        self.transport.record(|r| r.sessions_closed += 1);
        Ok(())
    }
}
