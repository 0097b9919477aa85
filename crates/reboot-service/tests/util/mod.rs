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
#![allow(dead_code)]

pub mod mock_bmc;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use http::{Request, Response};
use http_body_util::BodyExt;
use reboot_credentials::{Credentials, InMemoryCredentialProvider};
use reboot_service::connector::SshConnector;
use reboot_service::connector::test_support::MockTransport;
use reboot_service::e2e::{ProbeCollector, ProbeConfig};
use reboot_service::metrics::RebootMetrics;
use reboot_service::reboot::{RebootConfig, RebootHandler};
use reboot_service::web::{self, AppState};

pub const BMC_HOSTNAME: &str = "mlab1d.lga0t.measurement-lab.org";
pub const BMC_ADDRESS: &str = "192.0.2.10";

pub fn bmc_credentials() -> Credentials {
    Credentials {
        hostname: BMC_HOSTNAME.to_string(),
        username: "admin".to_string(),
        password: "secret".to_string(),
        model: "DRAC".to_string(),
        address: BMC_ADDRESS.to_string(),
    }
}

pub struct TestApp {
    pub router: Router,
    pub metrics: Arc<RebootMetrics>,
}

pub fn new_test_app(transport: &MockTransport, records: Vec<Credentials>) -> TestApp {
    new_test_app_with_auth(transport, records, None)
}

pub fn new_test_app_with_auth(
    transport: &MockTransport,
    records: Vec<Credentials>,
    http_auth: Option<&reboot_service::config::HttpAuthConfig>,
) -> TestApp {
    let credentials = Arc::new(InMemoryCredentialProvider::from_records(records));
    let connector = Arc::new(SshConnector::with_dialer(Arc::new(transport.clone())));
    let metrics = Arc::new(RebootMetrics::new());
    let state = AppState {
        reboot: Arc::new(RebootHandler::new(
            RebootConfig {
                ssh_port: 22,
                bmc_port: 806,
                reboot_user: "reboot-api".to_string(),
                private_key_path: None,
                bmc_connect_timeout: Duration::from_secs(60),
                credentials_timeout: Duration::from_secs(10),
                fleet_domain: "measurement-lab.org".to_string(),
            },
            credentials.clone(),
            connector.clone(),
            metrics.clone(),
        )),
        probe: Arc::new(ProbeCollector::new(
            ProbeConfig {
                bmc_port: 806,
                connect_timeout: Duration::from_secs(45),
                credentials_timeout: Duration::from_secs(10),
                private_key_path: None,
                fleet_domain: "measurement-lab.org".to_string(),
            },
            credentials,
            connector,
        )),
    };
    TestApp {
        router: web::router(state, http_auth),
        metrics,
    }
}

pub fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let body_bytes = response
        .into_body()
        .collect()
        .await
        .expect("Empty response body?")
        .to_bytes();
    String::from_utf8(body_bytes.to_vec()).expect("Invalid UTF-8 in body")
}
