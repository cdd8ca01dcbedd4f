// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! wsd-engine: the reconciliation manager, the port forwarder, the
//! webspace entity, non-interactive exec, and the interactive console/exec
//! bridge — the pieces that turn the hypervisor and edge-provider
//! contracts `wsd-adapters` exposes into a converging system.

pub mod bridge;
pub mod config;
pub mod exec;
pub mod forwarder;
pub mod manager;
pub mod webspace;

pub use config::{EngineConfig, PortsConfig};
pub use manager::Manager;
