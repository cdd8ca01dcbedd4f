// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Route handlers for the public API (§6). Each handler resolves the
//! `{username}` path segment through [`auth::resolve_target`] before
//! touching the manager, so `self` and cross-user admin gating are
//! enforced uniformly.

use std::collections::HashMap;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::Arc;

use wsd_adapters::hypervisor::{InstanceState, InstanceStatus};
use wsd_engine::bridge::{self, FrameSink, RemoteSession, SessionKind};
use wsd_wire::{
    AllocatePortRequest, AllocatedPortResponse, CreateWebspaceRequest, DiskUsageResponse, ExecRequest as ExecBody,
    ExecResponse, ImageResponse, NetworkCountersResponse, NetworkInterfaceResponse, PatchConfigRequest,
    StateResponse, UsageResponse, WebspaceResponse,
};

use super::auth::{resolve_target, AuthUser};
use super::error::ApiResult;
use super::ws::{SessionBridge, WsSink, WsSource};
use super::AppState;

pub async fn list_images(State(state): State<AppState>) -> ApiResult<Json<Vec<ImageResponse>>> {
    let images = state.manager.images().await?;
    Ok(Json(images.iter().map(ImageResponse::from).collect()))
}

pub async fn create_webspace(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
    Json(body): Json<CreateWebspaceRequest>,
) -> ApiResult<(StatusCode, Json<WebspaceResponse>)> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    let ssh_key = if body.ssh { body.ssh_key.as_deref() } else { None };
    let w = state
        .manager
        .create(target.id, &body.image, body.password.as_deref(), ssh_key)
        .await?;
    Ok((StatusCode::CREATED, Json(WebspaceResponse::new(&w))))
}

pub async fn get_webspace(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
) -> ApiResult<Json<WebspaceResponse>> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    let w = state.manager.get(target.id, None).await?;
    Ok(Json(WebspaceResponse::new(&w)))
}

pub async fn delete_webspace(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
) -> ApiResult<StatusCode> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    state.manager.delete(target.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn to_state_response(s: InstanceState) -> StateResponse {
    StateResponse {
        running: s.status == InstanceStatus::Running,
        uptime: s.uptime_secs,
        usage: UsageResponse {
            cpu: s.usage.cpu,
            disks: s
                .usage
                .disks
                .into_iter()
                .map(|(k, v)| {
                    (
                        k,
                        DiskUsageResponse {
                            usage: v.usage,
                            total: v.total,
                        },
                    )
                })
                .collect(),
            memory: s.usage.memory,
            processes: s.usage.processes,
        },
        network_interfaces: s
            .network
            .into_iter()
            .map(|iface| NetworkInterfaceResponse {
                name: iface.name,
                mac: iface.mac,
                mtu: iface.mtu,
                state: iface.state,
                counters: NetworkCountersResponse {
                    bytes_received: iface.counters.bytes_received,
                    bytes_sent: iface.counters.bytes_sent,
                    packets_received: iface.counters.packets_received,
                    packets_sent: iface.counters.packets_sent,
                },
                addresses: iface.addresses.into_iter().map(|a| a.address).collect(),
            })
            .collect(),
    }
}

pub async fn get_state(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
) -> ApiResult<Json<StateResponse>> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    let s = state.manager.state(target.id).await?;
    Ok(Json(to_state_response(s)))
}

pub async fn boot(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
) -> ApiResult<StatusCode> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    state.manager.boot(target.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn sync(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
) -> ApiResult<StatusCode> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    state.manager.sync(target.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reboot(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
) -> ApiResult<StatusCode> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    state.manager.reboot(target.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn shutdown_webspace(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
) -> ApiResult<StatusCode> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    state.manager.shutdown_webspace(target.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_config(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
) -> ApiResult<Json<wsd_core::WebspaceConfig>> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    Ok(Json(state.manager.config(target.id).await?))
}

/// Returns the configuration as it stood *before* the patch (§6).
pub async fn patch_config(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
    Json(patch): Json<PatchConfigRequest>,
) -> ApiResult<Json<wsd_core::WebspaceConfig>> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    let previous = state.manager.patch_config(target.id, &patch).await?;
    Ok(Json(previous))
}

pub async fn get_domains(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    Ok(Json(state.manager.domains(target.id).await?))
}

pub async fn add_domain(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path((username, domain)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    state.manager.add_domain(target.id, &domain).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_domain(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path((username, domain)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    state.manager.remove_domain(target.id, &domain).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_ports(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
) -> ApiResult<Json<HashMap<u16, u16>>> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    let w = state.manager.get(target.id, None).await?;
    Ok(Json(w.ports))
}

/// `POST …/ports/{ePort}/{iPort}`: both ports explicit, no body.
pub async fn add_port_explicit(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path((username, e_port, i_port)): Path<(String, u16, u16)>,
) -> ApiResult<StatusCode> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    state.manager.add_port(target.id, e_port, i_port).await?;
    Ok(StatusCode::CREATED)
}

/// `POST …/ports/{port}` with an optional `{ePort}` body: `{port}` is the
/// internal port; an absent `ePort` auto-allocates the external one.
pub async fn add_port_auto(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path((username, i_port)): Path<(String, u16)>,
    body: Option<Json<AllocatePortRequest>>,
) -> ApiResult<(StatusCode, Json<AllocatedPortResponse>)> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    let requested = body.and_then(|Json(b)| b.e_port).unwrap_or(0);
    let chosen = state.manager.add_port(target.id, requested, i_port).await?;
    Ok((StatusCode::CREATED, Json(AllocatedPortResponse { e_port: chosen })))
}

pub async fn remove_port(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path((username, e_port)): Path<(String, u16)>,
) -> ApiResult<StatusCode> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    state.manager.remove_port(target.id, e_port).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_log(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
) -> ApiResult<String> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    Ok(state.manager.log(target.id).await?)
}

pub async fn clear_log(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
) -> ApiResult<StatusCode> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    state.manager.clear_log(target.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn exec(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
    Json(body): Json<ExecBody>,
) -> ApiResult<Json<ExecResponse>> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    let outcome = state.manager.exec(target.id, &body.command, true).await?;
    Ok(Json(ExecResponse {
        stdout: outcome.stdout,
        stderr: outcome.stderr,
        exit_code: outcome.exit_code,
    }))
}

pub async fn console(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    let uid = target.id;
    let manager = state.manager.clone();
    Ok(ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        let sink: Arc<dyn FrameSink> = Arc::new(WsSink::new(sink));
        let source = Box::new(WsSource::new(stream));
        let result = bridge::run(SessionKind::Console, sink, source, move |w, h| {
            let manager = manager.clone();
            async move {
                let session = manager.attach_console(uid, w, h).await?;
                Ok(Box::new(SessionBridge(session)) as Box<dyn RemoteSession>)
            }
        })
        .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, "console bridge ended with error");
        }
    }))
}

#[derive(Debug, Deserialize)]
pub struct ExecQuery {
    pub command: String,
}

pub async fn exec_interactive(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
    Query(query): Query<ExecQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    let uid = target.id;
    let manager = state.manager.clone();
    let command = query.command;
    Ok(ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        let sink: Arc<dyn FrameSink> = Arc::new(WsSink::new(sink));
        let source = Box::new(WsSource::new(stream));
        let result = bridge::run(SessionKind::Exec, sink, source, move |w, h| {
            let manager = manager.clone();
            let command = command.clone();
            async move {
                let session = manager.attach_exec(uid, &command, w, h).await?;
                Ok(Box::new(SessionBridge(session)) as Box<dyn RemoteSession>)
            }
        })
        .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, "exec bridge ended with error");
        }
    }))
}

pub async fn ensure_started(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
) -> ApiResult<String> {
    let target = resolve_target(state.identity.as_ref(), &username, &caller).await?;
    Ok(state.manager.ensure_started(target.id).await?)
}

pub async fn health(State(state): State<AppState>) -> StatusCode {
    if state.manager.healthy() {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}
