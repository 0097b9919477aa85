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

use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, registry};

/// Installs the global subscriber. `RUST_LOG` applies on top of an INFO default; each `debug`
/// step raises the level (1 = DEBUG, 2+ = TRACE).
pub fn init(debug: u8) -> eyre::Result<()> {
    let mut env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    if debug != 0 {
        env_filter = env_filter.add_directive(
            match debug {
                1 => LevelFilter::DEBUG,
                _ => LevelFilter::TRACE,
            }
            .into(),
        );
    }

    env_filter = env_filter
        .add_directive("russh=warn".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("rustify=off".parse()?)
        .add_directive("vaultrs=warn".parse()?);

    registry()
        .with(fmt::Layer::default().compact())
        .with(env_filter)
        .try_init()?;
    Ok(())
}
