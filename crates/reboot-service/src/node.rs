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

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static NODE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(mlab[1-4]d?)\.([a-zA-Z]{3}[0-9t]{2})")
        .expect("BUG: static node pattern must be valid")
});

/// Suffix appended to a machine name to address its management controller.
const BMC_SUFFIX: char = 'd';

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("The specified hostname is not a valid M-Lab node: {0}")]
pub struct NodeParseError(pub String);

/// A fleet node named by machine and site, e.g. `mlab1` at `lga0t`.
///
/// The machine is kept without the controller suffix, so `mlab1d.lga0t` and `mlab1.lga0t` name
/// the same node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeIdentity {
    machine: String,
    site: String,
}

impl NodeIdentity {
    /// Accepts anything containing `<machine>.<site>`: shorthand (`mlab1.lga0t`), OS or
    /// controller FQDNs.
    pub fn parse(target: &str) -> Result<Self, NodeParseError> {
        let captures = NODE_PATTERN
            .captures(target)
            .ok_or_else(|| NodeParseError(target.to_string()))?;
        let machine = &captures[1];
        Ok(Self {
            machine: machine
                .strip_suffix(BMC_SUFFIX)
                .unwrap_or(machine)
                .to_string(),
            site: captures[2].to_string(),
        })
    }

    pub fn machine(&self) -> &str {
        &self.machine
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    /// Hostname of the node's operating system.
    pub fn hostname(&self, domain: &str) -> String {
        format!("{}.{}.{domain}", self.machine, self.site)
    }

    /// Hostname of the node's management controller.
    pub fn bmc_hostname(&self, domain: &str) -> String {
        format!("{}{BMC_SUFFIX}.{}.{domain}", self.machine, self.site)
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.machine, self.site)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN: &str = "measurement-lab.org";

    #[test]
    fn shorthand_and_fqdn_name_the_same_node() {
        let short = NodeIdentity::parse("mlab1.lga0t").unwrap();
        let fqdn = NodeIdentity::parse("mlab1.lga0t.measurement-lab.org").unwrap();
        let bmc = NodeIdentity::parse("mlab1d.lga0t.measurement-lab.org").unwrap();

        assert_eq!(short, fqdn);
        assert_eq!(short, bmc);
        assert_eq!(short.machine(), "mlab1");
        assert_eq!(short.site(), "lga0t");
    }

    #[test]
    fn derives_canonical_hostnames() {
        let node = NodeIdentity::parse("mlab4.abc01").unwrap();
        assert_eq!(node.hostname(DOMAIN), "mlab4.abc01.measurement-lab.org");
        assert_eq!(node.bmc_hostname(DOMAIN), "mlab4d.abc01.measurement-lab.org");

        let node = NodeIdentity::parse("mlab4d.abc01.measurement-lab.org").unwrap();
        assert_eq!(node.bmc_hostname(DOMAIN), "mlab4d.abc01.measurement-lab.org");
    }

    #[test]
    fn rejects_names_outside_the_fleet_convention() {
        for target in ["", "mlab5.lga0t", "mlab1.lg0t", "mlab1-lga0t", "www.example.com", "mlab1.lga0x"] {
            assert_eq!(
                NodeIdentity::parse(target),
                Err(NodeParseError(target.to_string())),
                "{target}"
            );
        }
    }

    #[test]
    fn error_message_names_the_target() {
        let err = NodeIdentity::parse("bogus").unwrap_err();
        assert_eq!(
            err.to_string(),
            "The specified hostname is not a valid M-Lab node: bogus"
        );
    }
}
