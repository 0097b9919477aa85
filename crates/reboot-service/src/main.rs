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
use std::sync::Arc;

use eyre::Context;
use reboot_credentials::Credentials;
use reboot_service::config::Config;

mod command_line;

use command_line::{Command, CredentialsCommand, Options};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let options = Options::load();
    reboot_service::logging::init(options.debug)?;

    let config = match &options.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Error loading config from {}", path.display()))?,
        None => Config::default(),
    };

    match options.subcmd {
        Command::DefaultConfig => {
            println!("{}", Config::default().into_annotated_config_file());
        }
        Command::Run => {
            let handle = reboot_service::spawn(Arc::new(config)).await?;
            tokio::signal::ctrl_c()
                .await
                .context("error waiting for ctrl-c")?;
            tracing::info!("received ctrl-c, shutting down");
            handle.shutdown_and_wait().await;
        }
        Command::Credentials(command) => {
            let provider = reboot_service::make_credential_provider(&config)?;
            match command {
                CredentialsCommand::Get { hostname } => {
                    let credentials = provider.find_credentials(&hostname).await?;
                    tracing::debug!(?credentials, "found credentials");
                    println!("{}", credentials.to_json_string()?);
                }
                CredentialsCommand::Add {
                    hostname,
                    username,
                    password,
                    model,
                    address,
                } => {
                    provider
                        .add_credentials(Credentials {
                            hostname: hostname.clone(),
                            username,
                            password,
                            model,
                            address,
                        })
                        .await?;
                    tracing::info!(%hostname, "stored credentials");
                }
                CredentialsCommand::Delete { hostname } => {
                    provider.delete_credentials(&hostname).await?;
                    tracing::info!(%hostname, "deleted credentials");
                }
            }
        }
    }

    Ok(())
}
