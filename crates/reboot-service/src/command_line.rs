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
use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[derive(Parser)]
#[clap(name = env!("CARGO_BIN_NAME"), version, about = "Power-cycle fleet nodes over SSH")]
pub(crate) struct Options {
    #[clap(short, long, action = ArgAction::Count, help = "Raise log level (-d debug, -dd trace)")]
    pub debug: u8,

    #[clap(long, help = "Path to the TOML config file (defaults apply without one)")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub subcmd: Command,
}

#[derive(Parser)]
pub(crate) enum Command {
    #[clap(about = "Run the reboot API and metrics listeners")]
    Run,
    #[clap(about = "Print the default configuration file, with comments")]
    DefaultConfig,
    #[clap(subcommand, about = "Manage stored BMC credentials")]
    Credentials(CredentialsCommand),
}

#[derive(Parser)]
pub(crate) enum CredentialsCommand {
    #[clap(about = "Print the record for a BMC hostname as JSON")]
    Get { hostname: String },
    #[clap(about = "Store a record, replacing any existing one for the hostname")]
    Add {
        #[clap(long)]
        hostname: String,
        #[clap(long)]
        username: String,
        #[clap(long, env = "BMC_PASSWORD", hide_env_values = true)]
        password: String,
        #[clap(long, default_value = "DRAC")]
        model: String,
        #[clap(long)]
        address: String,
    },
    #[clap(about = "Remove the record for a BMC hostname")]
    Delete { hostname: String },
}

impl Options {
    pub fn load() -> Self {
        Self::parse()
    }
}
