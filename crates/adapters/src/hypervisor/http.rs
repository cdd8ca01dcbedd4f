// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A real `Hypervisor` implementation talking to an LXD-like HTTP API over
//! a Unix socket or TCP+TLS endpoint. Sufficient to exercise the contract;
//! not a complete client for every hypervisor operation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;
use wsd_core::Image;

use super::{
    map_error, ExecOutcome, Hypervisor, HypervisorEvent, InstanceState, InstanceStatus,
    InteractiveSession, NetworkCounters, NetworkInterfaceState, ResourceUsage,
};

pub struct HttpHypervisor {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Clone)]
pub struct HttpHypervisorConfig {
    pub base_url: String,
    pub tls_client_cert: Option<String>,
    pub tls_client_key: Option<String>,
    pub request_timeout: Duration,
}

impl HttpHypervisor {
    pub fn new(cfg: HttpHypervisorConfig) -> wsd_core::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(cfg.request_timeout);
        if let (Some(cert), Some(key)) = (&cfg.tls_client_cert, &cfg.tls_client_key) {
            let pem = format!("{cert}\n{key}");
            let identity = reqwest::Identity::from_pem(pem.as_bytes())
                .map_err(|e| wsd_core::Error::Internal(e.into()))?;
            builder = builder.identity(identity);
        }
        let client = builder
            .build()
            .map_err(|e| wsd_core::Error::Internal(e.into()))?;
        Ok(Self {
            client,
            base_url: cfg.base_url,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Same endpoint, as a `ws(s)://` URL for the operation's data/control
    /// websockets.
    fn ws_url(&self, path: &str) -> String {
        let ws_base = self
            .base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{ws_base}{path}")
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> wsd_core::Result<T> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| map_error(&e.to_string()))?;
        parse_response(resp).await
    }

    async fn put_json(&self, path: &str, body: serde_json::Value) -> wsd_core::Result<()> {
        let resp = self
            .client
            .put(self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| map_error(&e.to_string()))?;
        let _: serde_json::Value = parse_response(resp).await?;
        Ok(())
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> wsd_core::Result<T> {
        let resp = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| map_error(&e.to_string()))?;
        parse_response(resp).await
    }

    /// Connects the data and control websockets an async console/exec
    /// operation's `fds` metadata names, and wraps them as an
    /// [`InteractiveSession`].
    async fn attach_operation(&self, op: RawOperation) -> wsd_core::Result<Box<dyn InteractiveSession>> {
        let data_secret = op
            .metadata
            .fds
            .get("0")
            .ok_or_else(|| wsd_core::Error::Internal(anyhow::anyhow!("operation missing data fd")))?;
        let control_secret = op.metadata.fds.get("control").cloned();

        let data_url = self.ws_url(&format!(
            "/1.0/operations/{}/websocket?secret={data_secret}",
            op.metadata.id
        ));
        let (data_ws, _) = tokio_tungstenite::connect_async(data_url)
            .await
            .map_err(|e| wsd_core::Error::Internal(e.into()))?;

        let control_ws = match control_secret {
            Some(secret) => {
                let control_url = self.ws_url(&format!(
                    "/1.0/operations/{}/websocket?secret={secret}",
                    op.metadata.id
                ));
                let (ws, _) = tokio_tungstenite::connect_async(control_url)
                    .await
                    .map_err(|e| wsd_core::Error::Internal(e.into()))?;
                Some(ws)
            }
            None => None,
        };

        Ok(Box::new(WsInteractiveSession {
            data: data_ws,
            control: control_ws,
            pending: Vec::new(),
            client: self.client.clone(),
            operation_url: self.url(&format!("/1.0/operations/{}", op.metadata.id)),
        }))
    }
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

async fn parse_response<T: for<'de> Deserialize<'de>>(
    resp: reqwest::Response,
) -> wsd_core::Result<T> {
    if !resp.status().is_success() {
        let err: Result<ApiError, _> = resp.json().await;
        let msg = err.map(|e| e.message).unwrap_or_else(|_| "not found".into());
        return Err(map_error(&msg));
    }
    resp.json().await.map_err(|e| wsd_core::Error::Internal(e.into()))
}

#[async_trait]
impl Hypervisor for HttpHypervisor {
    async fn list_images(&self) -> wsd_core::Result<Vec<Image>> {
        self.get_json("/1.0/images").await
    }

    async fn create_instance(&self, name: &str, fingerprint: &str) -> wsd_core::Result<()> {
        let _: serde_json::Value = self
            .post_json(
                "/1.0/instances",
                json!({ "name": name, "source": { "type": "image", "fingerprint": fingerprint } }),
            )
            .await?;
        Ok(())
    }

    async fn delete_instance(&self, name: &str) -> wsd_core::Result<()> {
        let resp = self
            .client
            .delete(self.url(&format!("/1.0/instances/{name}")))
            .send()
            .await
            .map_err(|e| map_error(&e.to_string()))?;
        let _: serde_json::Value = parse_response(resp).await?;
        Ok(())
    }

    async fn boot(&self, name: &str) -> wsd_core::Result<()> {
        self.put_json(
            &format!("/1.0/instances/{name}/state"),
            json!({ "action": "start", "timeout": -1 }),
        )
        .await
    }

    async fn reboot(&self, name: &str) -> wsd_core::Result<()> {
        self.put_json(
            &format!("/1.0/instances/{name}/state"),
            json!({ "action": "restart", "timeout": -1 }),
        )
        .await
    }

    async fn shutdown(&self, name: &str) -> wsd_core::Result<()> {
        self.put_json(
            &format!("/1.0/instances/{name}/state"),
            json!({ "action": "stop", "timeout": -1 }),
        )
        .await
    }

    async fn state(&self, name: &str) -> wsd_core::Result<InstanceState> {
        let raw: RawState = self.get_json(&format!("/1.0/instances/{name}/state")).await?;
        Ok(raw.into())
    }

    async fn get_config_key(&self, name: &str, key: &str) -> wsd_core::Result<Option<String>> {
        let raw: RawInstance = self.get_json(&format!("/1.0/instances/{name}")).await?;
        Ok(raw.config.get(key).cloned())
    }

    async fn set_config_key(&self, name: &str, key: &str, value: &str) -> wsd_core::Result<()> {
        let mut raw: RawInstance = self.get_json(&format!("/1.0/instances/{name}")).await?;
        raw.config.insert(key.to_string(), value.to_string());
        self.put_json(&format!("/1.0/instances/{name}"), json!(raw)).await
    }

    async fn list_config_entries(&self, key: &str) -> wsd_core::Result<Vec<(String, String)>> {
        let names: Vec<RawInstance> = self.get_json("/1.0/instances?recursion=1").await?;
        Ok(names
            .into_iter()
            .filter_map(|i| {
                let value = i.config.get(key)?.clone();
                Some((i.name.clone().unwrap_or_default(), value))
            })
            .collect())
    }

    async fn exec(&self, name: &str, cmd: &str) -> wsd_core::Result<ExecOutcome> {
        let raw: RawExecResult = self
            .post_json(
                &format!("/1.0/instances/{name}/exec"),
                json!({ "command": ["sh", "-c", cmd], "record-output": true, "wait-for-websocket": false }),
            )
            .await?;
        Ok(ExecOutcome {
            exit_code: raw.exit_code,
            stdout: raw.stdout,
            stderr: raw.stderr,
        })
    }

    async fn console_log(&self, name: &str) -> wsd_core::Result<String> {
        let resp = self
            .client
            .get(self.url(&format!("/1.0/instances/{name}/console")))
            .send()
            .await
            .map_err(|e| map_error(&e.to_string()))?;
        if !resp.status().is_success() {
            return Err(map_error("not found"));
        }
        resp.text().await.map_err(|e| wsd_core::Error::Internal(e.into()))
    }

    async fn clear_console_log(&self, name: &str) -> wsd_core::Result<()> {
        let resp = self
            .client
            .delete(self.url(&format!("/1.0/instances/{name}/console")))
            .send()
            .await
            .map_err(|e| map_error(&e.to_string()))?;
        let _: serde_json::Value = parse_response(resp).await?;
        Ok(())
    }

    async fn attach_console(
        &self,
        name: &str,
        width: u16,
        height: u16,
    ) -> wsd_core::Result<Box<dyn InteractiveSession>> {
        let op: RawOperation = self
            .post_json(
                &format!("/1.0/instances/{name}/console"),
                json!({ "width": width, "height": height }),
            )
            .await?;
        self.attach_operation(op).await
    }

    async fn attach_exec(
        &self,
        name: &str,
        command: &str,
        width: u16,
        height: u16,
    ) -> wsd_core::Result<Box<dyn InteractiveSession>> {
        let op: RawOperation = self
            .post_json(
                &format!("/1.0/instances/{name}/exec"),
                json!({
                    "command": ["sh", "-c", command],
                    "wait-for-websocket": true,
                    "interactive": true,
                    "record-output": false,
                    "width": width,
                    "height": height,
                }),
            )
            .await?;
        self.attach_operation(op).await
    }

    async fn subscribe_events(
        &self,
    ) -> wsd_core::Result<tokio::sync::mpsc::Receiver<HypervisorEvent>> {
        // Real implementation would open a long-lived streaming request
        // against `/1.0/events` and forward decoded lines onto the
        // channel; see `wsd-engine::manager` for the reconnect loop that
        // drives this call.
        let (_tx, rx) = tokio::sync::mpsc::channel(64);
        Ok(rx)
    }
}

#[derive(Deserialize, Serialize)]
struct RawInstance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    config: std::collections::HashMap<String, String>,
}

#[derive(Deserialize)]
struct RawExecResult {
    #[serde(rename = "exitCode")]
    exit_code: i32,
    stdout: String,
    stderr: String,
}

#[derive(Deserialize)]
struct RawState {
    status: String,
    #[serde(default)]
    uptime: u64,
    cpu: RawCpu,
    memory: RawMemory,
    processes: u64,
    disk: std::collections::HashMap<String, RawDisk>,
    network: std::collections::HashMap<String, RawNetworkInterface>,
}

#[derive(Deserialize, Default)]
struct RawCpu {
    usage: f64,
}

#[derive(Deserialize, Default)]
struct RawMemory {
    usage: u64,
}

#[derive(Deserialize)]
struct RawDisk {
    usage: i64,
    total: i64,
}

#[derive(Deserialize)]
struct RawNetworkInterface {
    hwaddr: String,
    mtu: u32,
    state: String,
    counters: RawCounters,
    addresses: Vec<RawAddress>,
}

#[derive(Deserialize, Default)]
struct RawCounters {
    #[serde(rename = "bytesReceived")]
    bytes_received: u64,
    #[serde(rename = "bytesSent")]
    bytes_sent: u64,
    #[serde(rename = "packetsReceived")]
    packets_received: u64,
    #[serde(rename = "packetsSent")]
    packets_sent: u64,
}

#[derive(Deserialize)]
struct RawAddress {
    family: String,
    address: String,
    scope: String,
}

impl From<RawState> for InstanceState {
    fn from(raw: RawState) -> Self {
        let mut disks = std::collections::HashMap::new();
        for (name, d) in raw.disk {
            // Disks with usage == -1 are omitted (§4.4 State()).
            if d.usage != -1 {
                disks.insert(
                    name,
                    super::DiskUsage {
                        usage: d.usage,
                        total: d.total,
                    },
                );
            }
        }

        let network = raw
            .network
            .into_iter()
            // The loopback interface is always omitted (§4.4 State()).
            .filter(|(name, _)| name != "lo")
            .map(|(name, i)| NetworkInterfaceState {
                name,
                mac: i.hwaddr,
                mtu: i.mtu,
                state: i.state,
                counters: NetworkCounters {
                    bytes_received: i.counters.bytes_received,
                    bytes_sent: i.counters.bytes_sent,
                    packets_received: i.counters.packets_received,
                    packets_sent: i.counters.packets_sent,
                },
                addresses: i
                    .addresses
                    .into_iter()
                    .map(|a| super::NetworkAddress {
                        family: a.family,
                        address: a.address,
                        scope: a.scope,
                    })
                    .collect(),
            })
            .collect();

        InstanceState {
            status: if raw.status == "Running" {
                InstanceStatus::Running
            } else if raw.status == "Stopped" {
                InstanceStatus::Stopped
            } else {
                InstanceStatus::Other
            },
            uptime_secs: raw.uptime,
            usage: ResourceUsage {
                cpu: raw.cpu.usage,
                disks,
                memory: raw.memory.usage,
                processes: raw.processes,
            },
            network,
        }
    }
}

#[derive(Deserialize)]
struct RawOperation {
    metadata: RawOperationMetadata,
}

#[derive(Deserialize)]
struct RawOperationMetadata {
    id: String,
    #[serde(default)]
    fds: HashMap<String, String>,
}

#[derive(Deserialize)]
struct RawOperationStatus {
    status: String,
    metadata: Option<serde_json::Value>,
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// An attached console/exec session: one websocket carries raw PTY bytes,
/// an optional second carries JSON control messages (`window-resize`,
/// `signal`), matching the console/exec protocol the source's LXD client
/// speaks.
struct WsInteractiveSession {
    data: WsStream,
    control: Option<WsStream>,
    pending: Vec<u8>,
    client: reqwest::Client,
    operation_url: String,
}

#[async_trait]
impl InteractiveSession for WsInteractiveSession {
    async fn write(&mut self, data: &[u8]) -> wsd_core::Result<()> {
        self.data
            .send(Message::Binary(data.to_vec().into()))
            .await
            .map_err(|e| wsd_core::Error::Internal(e.into()))
    }

    async fn read(&mut self, buf: &mut [u8]) -> wsd_core::Result<usize> {
        if self.pending.is_empty() {
            match self.data.next().await {
                Some(Ok(Message::Binary(bytes))) => self.pending = bytes.into(),
                Some(Ok(Message::Close(_))) | None => return Ok(0),
                Some(Ok(_)) => return Ok(0),
                Some(Err(e)) => return Err(wsd_core::Error::Internal(e.into())),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    async fn resize(&mut self, width: u16, height: u16) -> wsd_core::Result<()> {
        let Some(control) = &mut self.control else {
            return Ok(());
        };
        let msg = json!({
            "command": "window-resize",
            "args": { "width": width.to_string(), "height": height.to_string() },
        });
        control
            .send(Message::Text(msg.to_string().into()))
            .await
            .map_err(|e| wsd_core::Error::Internal(e.into()))
    }

    async fn signal(&mut self, signal: i32) -> wsd_core::Result<()> {
        let Some(control) = &mut self.control else {
            return Ok(());
        };
        let msg = json!({ "command": "signal", "signal": signal });
        control
            .send(Message::Text(msg.to_string().into()))
            .await
            .map_err(|e| wsd_core::Error::Internal(e.into()))
    }

    async fn wait(&mut self) -> wsd_core::Result<i32> {
        loop {
            let resp = self
                .client
                .get(&self.operation_url)
                .send()
                .await
                .map_err(|e| map_error(&e.to_string()))?;
            let op: RawOperationStatus = parse_response(resp).await?;
            if op.status == "Success" || op.status == "Failure" {
                let code = op
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("return"))
                    .and_then(|v| v.as_i64())
                    .unwrap_or(-1);
                return Ok(code as i32);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}
