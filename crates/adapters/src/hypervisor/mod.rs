// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The hypervisor client contract.
//!
//! This is one of the external collaborators spec.md names as out of
//! scope: the engine only consumes this trait, never a concrete client.
//! `HttpHypervisor` is a real implementation sufficient to exercise the
//! contract against an LXD-like HTTP API; it is not a complete LXD client.

mod error_map;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use wsd_core::Image;

pub use error_map::map_error;

/// Opaque handle identifying an instance to the hypervisor; equal to the
/// instance name (`wsd_core::naming::instance_name`).
pub type InstanceName = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    Running,
    Stopped,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub family: String,
    pub address: String,
    pub scope: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkCounters {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInterfaceState {
    pub name: String,
    pub mac: String,
    pub mtu: u32,
    pub state: String,
    pub counters: NetworkCounters,
    pub addresses: Vec<NetworkAddress>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskUsage {
    pub usage: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu: f64,
    pub disks: std::collections::HashMap<String, DiskUsage>,
    pub memory: u64,
    pub processes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceState {
    pub status: InstanceStatus,
    pub uptime_secs: u64,
    pub usage: ResourceUsage,
    pub network: Vec<NetworkInterfaceState>,
}

#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// A line of the hypervisor's lifecycle event stream, already deserialized.
pub type HypervisorEvent = wsd_core::LifecycleEvent;

/// One side of an interactive console or exec session attached to a
/// running instance: raw PTY bytes plus the resize/signal control-plane
/// actions the hypervisor's console/exec websocket protocol exposes.
/// `wsd-engine::bridge` consumes this through its own `RemoteSession`
/// trait; `wsd-daemon` bridges the two with a thin pass-through wrapper
/// so this crate never depends on the engine crate.
#[async_trait]
pub trait InteractiveSession: Send {
    async fn write(&mut self, data: &[u8]) -> wsd_core::Result<()>;
    /// `Ok(0)` signals the remote side closed the data stream.
    async fn read(&mut self, buf: &mut [u8]) -> wsd_core::Result<usize>;
    async fn resize(&mut self, width: u16, height: u16) -> wsd_core::Result<()>;
    async fn signal(&mut self, signal: i32) -> wsd_core::Result<()>;
    async fn wait(&mut self) -> wsd_core::Result<i32>;
}

/// The contract the reconciliation engine consumes from the hypervisor.
///
/// All operations are fallible with the webspace taxonomy directly
/// (`wsd_core::Error`); implementations translate whatever their transport
/// returns through [`map_error`].
#[async_trait]
pub trait Hypervisor: Send + Sync {
    async fn list_images(&self) -> wsd_core::Result<Vec<Image>>;

    async fn create_instance(&self, name: &str, fingerprint: &str) -> wsd_core::Result<()>;
    async fn delete_instance(&self, name: &str) -> wsd_core::Result<()>;

    async fn boot(&self, name: &str) -> wsd_core::Result<()>;
    async fn reboot(&self, name: &str) -> wsd_core::Result<()>;
    async fn shutdown(&self, name: &str) -> wsd_core::Result<()>;

    async fn state(&self, name: &str) -> wsd_core::Result<InstanceState>;

    /// Reads the reserved instance-config key (the persisted webspace
    /// blob). `None` if never set.
    async fn get_config_key(&self, name: &str, key: &str) -> wsd_core::Result<Option<String>>;
    async fn set_config_key(&self, name: &str, key: &str, value: &str) -> wsd_core::Result<()>;

    /// Lists every instance that carries `key` in its config, as
    /// `(instance_name, value)` pairs. Used by `GetAll` to discover
    /// webspaces among the hypervisor's full instance set.
    async fn list_config_entries(&self, key: &str) -> wsd_core::Result<Vec<(String, String)>>;

    /// Runs `sh -c <cmd>` inside the instance, recording output, and
    /// returns it decoded as UTF-8.
    async fn exec(&self, name: &str, cmd: &str) -> wsd_core::Result<ExecOutcome>;

    async fn console_log(&self, name: &str) -> wsd_core::Result<String>;
    async fn clear_console_log(&self, name: &str) -> wsd_core::Result<()>;

    /// Attaches to the instance's `/dev/console`, booting it first if it
    /// isn't already running.
    async fn attach_console(
        &self,
        name: &str,
        width: u16,
        height: u16,
    ) -> wsd_core::Result<Box<dyn InteractiveSession>>;

    /// Runs `command` interactively with a PTY attached, booting the
    /// instance first if it isn't already running.
    async fn attach_exec(
        &self,
        name: &str,
        command: &str,
        width: u16,
        height: u16,
    ) -> wsd_core::Result<Box<dyn InteractiveSession>>;

    /// Subscribes to the lifecycle event stream. Returns a fresh receiver
    /// each call; reconnection is the caller's responsibility (see
    /// `wsd-engine::manager`).
    async fn subscribe_events(
        &self,
    ) -> wsd_core::Result<tokio::sync::mpsc::Receiver<HypervisorEvent>>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// In-memory hypervisor fake for engine/adapter tests, grounded on the
    /// teacher's `test_support` fakes.
    #[derive(Default)]
    pub struct FakeHypervisor {
        instances: Mutex<HashMap<String, FakeInstance>>,
        images: Mutex<Vec<Image>>,
    }

    #[derive(Default, Clone)]
    struct FakeInstance {
        running: bool,
        config: HashMap<String, String>,
        ip: Option<String>,
    }

    impl FakeHypervisor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_images(self, images: Vec<Image>) -> Self {
            *self.images.lock() = images;
            self
        }

        pub fn set_ip(&self, name: &str, ip: &str) {
            self.instances
                .lock()
                .entry(name.to_string())
                .or_default()
                .ip = Some(ip.to_string());
        }
    }

    #[async_trait]
    impl Hypervisor for FakeHypervisor {
        async fn list_images(&self) -> wsd_core::Result<Vec<Image>> {
            Ok(self.images.lock().clone())
        }

        async fn create_instance(&self, name: &str, _fingerprint: &str) -> wsd_core::Result<()> {
            self.instances
                .lock()
                .insert(name.to_string(), FakeInstance::default());
            Ok(())
        }

        async fn delete_instance(&self, name: &str) -> wsd_core::Result<()> {
            self.instances
                .lock()
                .remove(name)
                .map(|_| ())
                .ok_or(wsd_core::Error::NotFound)
        }

        async fn boot(&self, name: &str) -> wsd_core::Result<()> {
            let mut map = self.instances.lock();
            let inst = map.get_mut(name).ok_or(wsd_core::Error::NotFound)?;
            inst.running = true;
            Ok(())
        }

        async fn reboot(&self, name: &str) -> wsd_core::Result<()> {
            self.boot(name).await
        }

        async fn shutdown(&self, name: &str) -> wsd_core::Result<()> {
            let mut map = self.instances.lock();
            let inst = map.get_mut(name).ok_or(wsd_core::Error::NotFound)?;
            inst.running = false;
            Ok(())
        }

        async fn state(&self, name: &str) -> wsd_core::Result<InstanceState> {
            let map = self.instances.lock();
            let inst = map.get(name).ok_or(wsd_core::Error::NotFound)?;
            let mut network = Vec::new();
            if let Some(ip) = &inst.ip {
                network.push(NetworkInterfaceState {
                    name: "eth0".into(),
                    mac: "00:00:00:00:00:00".into(),
                    mtu: 1500,
                    state: "up".into(),
                    counters: NetworkCounters {
                        bytes_received: 0,
                        bytes_sent: 0,
                        packets_received: 0,
                        packets_sent: 0,
                    },
                    addresses: vec![NetworkAddress {
                        family: "inet".into(),
                        address: ip.clone(),
                        scope: "global".into(),
                    }],
                });
            }
            Ok(InstanceState {
                status: if inst.running {
                    InstanceStatus::Running
                } else {
                    InstanceStatus::Stopped
                },
                uptime_secs: 0,
                usage: ResourceUsage {
                    cpu: 0.0,
                    disks: HashMap::new(),
                    memory: 0,
                    processes: 0,
                },
                network,
            })
        }

        async fn get_config_key(&self, name: &str, key: &str) -> wsd_core::Result<Option<String>> {
            let map = self.instances.lock();
            let inst = map.get(name).ok_or(wsd_core::Error::NotFound)?;
            Ok(inst.config.get(key).cloned())
        }

        async fn set_config_key(&self, name: &str, key: &str, value: &str) -> wsd_core::Result<()> {
            let mut map = self.instances.lock();
            let inst = map.get_mut(name).ok_or(wsd_core::Error::NotFound)?;
            inst.config.insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn list_config_entries(&self, key: &str) -> wsd_core::Result<Vec<(String, String)>> {
            Ok(self
                .instances
                .lock()
                .iter()
                .filter_map(|(name, inst)| {
                    inst.config.get(key).map(|v| (name.clone(), v.clone()))
                })
                .collect())
        }

        async fn exec(&self, name: &str, _cmd: &str) -> wsd_core::Result<ExecOutcome> {
            if !self.instances.lock().contains_key(name) {
                return Err(wsd_core::Error::NotFound);
            }
            Ok(ExecOutcome {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }

        async fn console_log(&self, _name: &str) -> wsd_core::Result<String> {
            Ok(String::new())
        }

        async fn clear_console_log(&self, _name: &str) -> wsd_core::Result<()> {
            Ok(())
        }

        async fn attach_console(
            &self,
            name: &str,
            _width: u16,
            _height: u16,
        ) -> wsd_core::Result<Box<dyn InteractiveSession>> {
            if !self.instances.lock().contains_key(name) {
                return Err(wsd_core::Error::NotFound);
            }
            Ok(Box::new(EchoSession::default()))
        }

        async fn attach_exec(
            &self,
            name: &str,
            _command: &str,
            _width: u16,
            _height: u16,
        ) -> wsd_core::Result<Box<dyn InteractiveSession>> {
            if !self.instances.lock().contains_key(name) {
                return Err(wsd_core::Error::NotFound);
            }
            Ok(Box::new(EchoSession::default()))
        }

        async fn subscribe_events(
            &self,
        ) -> wsd_core::Result<tokio::sync::mpsc::Receiver<HypervisorEvent>> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
    }

    /// Echoes whatever is written back out of `read`; never exits on its
    /// own. Sufficient to exercise the bridge's plumbing in tests without a
    /// real hypervisor.
    #[derive(Default)]
    pub struct EchoSession {
        buf: std::collections::VecDeque<u8>,
    }

    #[async_trait]
    impl InteractiveSession for EchoSession {
        async fn write(&mut self, data: &[u8]) -> wsd_core::Result<()> {
            self.buf.extend(data);
            Ok(())
        }

        async fn read(&mut self, out: &mut [u8]) -> wsd_core::Result<usize> {
            let n = self.buf.len().min(out.len());
            for slot in out.iter_mut().take(n) {
                *slot = self.buf.pop_front().unwrap();
            }
            Ok(n)
        }

        async fn resize(&mut self, _width: u16, _height: u16) -> wsd_core::Result<()> {
            Ok(())
        }

        async fn signal(&mut self, _signal: i32) -> wsd_core::Result<()> {
            Ok(())
        }

        async fn wait(&mut self) -> wsd_core::Result<i32> {
            Ok(0)
        }
    }
}
