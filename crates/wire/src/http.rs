// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP request/response DTOs for the public API (§6).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use wsd_core::{Image, Webspace};

/// `POST /v1/webspace/{username}` body.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWebspaceRequest {
    pub image: String,
    pub password: Option<String>,
    #[serde(default)]
    pub ssh: bool,
    pub ssh_key: Option<String>,
}

/// Webspace as returned by the API; the same shape as the persisted blob
/// plus the resolved default domain, matching `Create`/`Get` responses.
#[derive(Debug, Clone, Serialize)]
pub struct WebspaceResponse {
    pub user: u64,
    pub config: wsd_core::WebspaceConfig,
    pub domains: Vec<String>,
    pub ports: HashMap<u16, u16>,
}

impl WebspaceResponse {
    pub fn new(w: &Webspace) -> Self {
        Self {
            user: w.user_id,
            config: w.config.clone(),
            domains: w.domains.clone(),
            ports: w.ports.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageResponse {
    pub aliases: Vec<String>,
    pub fingerprint: String,
    pub properties: HashMap<String, String>,
    pub size: u64,
}

impl From<&Image> for ImageResponse {
    fn from(i: &Image) -> Self {
        Self {
            aliases: i.aliases.clone(),
            fingerprint: i.fingerprint.clone(),
            properties: i.properties.clone(),
            size: i.size,
        }
    }
}

/// `PATCH .../config` body; partial update, all fields optional.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PatchConfigRequest {
    pub startup_delay: Option<f64>,
    pub http_port: Option<u16>,
    pub sni_passthrough: Option<bool>,
}

/// `POST .../ports/{port}` body (auto-allocated external port variant).
#[derive(Debug, Clone, Deserialize)]
pub struct AllocatePortRequest {
    #[serde(rename = "ePort")]
    pub e_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocatedPortResponse {
    #[serde(rename = "ePort")]
    pub e_port: u16,
}

/// `POST .../exec` body and response.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecRequest {
    pub command: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// `GET .../state` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
    pub running: bool,
    pub uptime: u64,
    pub usage: UsageResponse,
    pub network_interfaces: Vec<NetworkInterfaceResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageResponse {
    pub cpu: f64,
    pub disks: HashMap<String, DiskUsageResponse>,
    pub memory: u64,
    pub processes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskUsageResponse {
    pub usage: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceResponse {
    pub name: String,
    pub mac: String,
    pub mtu: u32,
    pub state: String,
    pub counters: NetworkCountersResponse,
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkCountersResponse {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
}

/// Error body for the `application/problem+json` error responses (§7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_port_request_accepts_missing_e_port() {
        let req: AllocatePortRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.e_port, None);
    }

    #[test]
    fn problem_response_shape() {
        let p = ProblemResponse {
            message: "verification failed".into(),
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["message"], "verification failed");
    }
}
