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

use std::time::Duration;

use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounterVec, Registry, TextEncoder, opts,
};

use crate::e2e::ProbeOutcome;
use crate::node::NodeIdentity;

const BMC_REBOOT_DURATION_BUCKETS: &[f64] = &[15.0, 30.0, 45.0, 60.0];

/// Outcome label of a reboot attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootStatus {
    Ok,
    ErrorConnect,
    ErrorReboot,
}

impl RebootStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebootStatus::Ok => "ok",
            RebootStatus::ErrorConnect => "error-connect",
            RebootStatus::ErrorReboot => "error-reboot",
        }
    }
}

/// Reboot counters and timings, registered on a registry owned by this struct so tests can
/// inspect exactly what one handler recorded.
#[derive(Debug, Clone)]
pub struct RebootMetrics {
    registry: Registry,
    bmc_reboots_total: IntCounterVec,
    host_reboots_total: IntCounterVec,
    bmc_reboot_duration_seconds: Histogram,
}

impl Default for RebootMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RebootMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let bmc_reboots_total = IntCounterVec::new(
            opts!("reboot_bmc_total", "Total number of BMC reboots"),
            &["site", "machine", "status"],
        )
        .expect("BUG: static metric definition must be valid");
        let host_reboots_total = IntCounterVec::new(
            opts!("reboot_host_total", "Total number of host reboots"),
            &["site", "machine", "status"],
        )
        .expect("BUG: static metric definition must be valid");
        let bmc_reboot_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "reboot_bmc_duration_seconds",
                "Time taken to reboot a node through its BMC",
            )
            .buckets(BMC_REBOOT_DURATION_BUCKETS.to_vec()),
        )
        .expect("BUG: static metric definition must be valid");

        for collector in [
            Box::new(bmc_reboots_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(host_reboots_total.clone()),
            Box::new(bmc_reboot_duration_seconds.clone()),
        ] {
            registry
                .register(collector)
                .expect("BUG: metric names must be unique within the registry");
        }

        Self {
            registry,
            bmc_reboots_total,
            host_reboots_total,
            bmc_reboot_duration_seconds,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_bmc_reboot(&self, node: &NodeIdentity, status: RebootStatus) {
        self.bmc_reboots_total
            .with_label_values(&[node.site(), node.machine(), status.as_str()])
            .inc();
    }

    pub fn record_host_reboot(&self, node: &NodeIdentity, status: RebootStatus) {
        self.host_reboots_total
            .with_label_values(&[node.site(), node.machine(), status.as_str()])
            .inc();
    }

    pub fn observe_bmc_reboot_duration(&self, duration: Duration) {
        self.bmc_reboot_duration_seconds
            .observe(duration.as_secs_f64());
    }

    /// Current value of `reboot_bmc_total` for one node and status. Reading never creates the series.
    pub fn bmc_reboot_count(&self, node: &NodeIdentity, status: RebootStatus) -> u64 {
        self.counter_value("reboot_bmc_total", node, status)
    }

    /// Current value of `reboot_host_total` for one node and status. Reading never creates the series.
    pub fn host_reboot_count(&self, node: &NodeIdentity, status: RebootStatus) -> u64 {
        self.counter_value("reboot_host_total", node, status)
    }

    // Goes through gather() because with_label_values() would register a zero sample.
    fn counter_value(&self, name: &str, node: &NodeIdentity, status: RebootStatus) -> u64 {
        let labels = [
            ("site", node.site()),
            ("machine", node.machine()),
            ("status", status.as_str()),
        ];
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == name)
            .flat_map(|family| family.get_metric())
            .find(|metric| {
                labels.iter().all(|(key, value)| {
                    metric
                        .get_label()
                        .iter()
                        .any(|pair| pair.get_name() == *key && pair.get_value() == *value)
                })
            })
            .map(|metric| metric.get_counter().get_value() as u64)
            .unwrap_or(0)
    }

    pub fn bmc_reboot_duration_count(&self) -> u64 {
        self.bmc_reboot_duration_seconds.get_sample_count()
    }

    /// Text exposition of every reboot metric.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        encode_registry(&self.registry)
    }
}

/// Renders one probe result as a standalone exposition. Every call builds its own registry so
/// concurrent probes never see each other's samples.
pub fn encode_probe_result(target: &str, outcome: &ProbeOutcome) -> Result<Vec<u8>, prometheus::Error> {
    let registry = Registry::new();
    let e2e_result = GaugeVec::new(
        opts!("reboot_e2e_result", "E2E test result for this target"),
        &["target", "status", "reason"],
    )?;
    registry.register(Box::new(e2e_result.clone()))?;
    e2e_result
        .with_label_values(&[target, outcome.status(), outcome.reason()])
        .set(outcome.value());
    encode_registry(&registry)
}

pub fn encode_registry(registry: &Registry) -> Result<Vec<u8>, prometheus::Error> {
    let mut buffer = vec![];
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(buffer)
}

pub fn content_type() -> String {
    TextEncoder::new().format_type().to_string()
}
