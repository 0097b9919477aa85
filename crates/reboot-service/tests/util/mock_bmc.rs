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

//! An SSH server that behaves like the fleet's BMCs: `racadm` over exec reports its exit status,
//! but interactive shells close without ever sending one.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use russh::keys::{PrivateKey, PublicKey};
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId, MethodKind, MethodSet};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const USER: &str = "admin";
pub const PASSWORD: &str = "secret";
pub const POWERCYCLE_OUTPUT: &str = "Server power operation successful\n";
pub const SHELL_BANNER: &str = "Connected to iDRAC\n";

pub const KEY_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/valid_ed25519_key");

pub struct MockBmc {
    addr: SocketAddr,
    join_handle: JoinHandle<()>,
}

impl MockBmc {
    pub async fn spawn() -> eyre::Result<Self> {
        let host_key = PrivateKey::read_openssh_file(std::path::Path::new(KEY_PATH))?;
        let authorized_key = host_key.public_key().clone();
        let config = Arc::new(russh::server::Config {
            keys: vec![host_key],
            methods: MethodSet::from([MethodKind::Password, MethodKind::PublicKey].as_slice()),
            auth_rejection_time: Duration::from_millis(10),
            auth_rejection_time_initial: Some(Duration::ZERO),
            ..Default::default()
        });

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let join_handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let handler = Handler {
                    authorized_key: authorized_key.clone(),
                    lines: HashMap::new(),
                };
                let config = config.clone();
                tokio::spawn(async move {
                    if let Ok(session) = russh::server::run_stream(config, socket, handler).await {
                        session.await.ok();
                    }
                });
            }
        });
        Ok(Self { addr, join_handle })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for MockBmc {
    fn drop(&mut self) {
        self.join_handle.abort();
    }
}

struct Handler {
    authorized_key: PublicKey,
    lines: HashMap<ChannelId, Vec<u8>>,
}

impl russh::server::Handler for Handler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if user == USER && password == PASSWORD {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            })
        }
    }

    async fn auth_publickey(
        &mut self,
        _user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        if public_key.key_data() == self.authorized_key.key_data() {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel).ok();
        let (output, status) = match data {
            b"racadm serveraction powercycle" => (POWERCYCLE_OUTPUT, 0),
            // The reboot account's login hook; nothing to print.
            b"" => ("", 0),
            _ => ("ERROR: Invalid subcommand specified.\n", 1),
        };
        if !output.is_empty() {
            session.data(channel, output.into()).ok();
        }
        session.exit_status_request(channel, status).ok();
        session.eof(channel).ok();
        session.close(channel).ok();
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel).ok();
        session.extended_data(channel, 1, SHELL_BANNER.into()).ok();
        self.lines.insert(channel, Vec::new());
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let Some(buffer) = self.lines.get_mut(&channel) else {
            return Ok(());
        };
        buffer.extend_from_slice(data);
        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            if line.trim_ascii() == b"exit" {
                // No exit-status message, just like the real firmware.
                session.eof(channel).ok();
                session.close(channel).ok();
                self.lines.remove(&channel);
                return Ok(());
            }
            session.data(channel, line.as_slice().into()).ok();
        }
        Ok(())
    }
}
