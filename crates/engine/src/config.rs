// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The subset of the daemon's configuration the engine needs to drive
//! naming, port allocation, and IP-wait timeouts. `wsd-daemon` owns the
//! full layered configuration (file + env + CLI); this is what it hands
//! down when constructing a [`crate::manager::Manager`].

use std::time::Duration;

use wsd_core::WebspaceConfig;

#[derive(Debug, Clone)]
pub struct PortsConfig {
    pub start: u16,
    pub end: u16,
    pub max: usize,
    /// Name of a Kubernetes Service to mirror forwarded ports onto, when
    /// running in-cluster. `None` disables the mirror.
    pub kubernetes_service: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Prefix prepended to a user id to build the hypervisor instance name
    /// (e.g. `"ws-"` → `ws-u7`).
    pub instance_prefix: String,
    /// The reserved instance-config key the persisted webspace blob lives
    /// under.
    pub config_key: String,
    /// Base domain webspaces are published under (`<username>.<base>`).
    pub domain_base: String,
    pub ports: PortsConfig,
    /// Cap on `AwaitIP`'s total retry elapsed time.
    pub ip_timeout: Duration,
    /// Profile applied to every instance created for a new webspace.
    pub instance_profile: String,
    pub config_defaults: WebspaceConfig,
}
