// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The webspace data model: the `(userID, config, domains, ports)` tuple
//! that is the only state the core persists of record (inside a single key
//! of the hypervisor's instance configuration; see `wsd-wire::persisted`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Per-webspace configuration. `startup_delay` is a float number of seconds
/// to match the source's duration-as-float wire representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebspaceConfig {
    pub startup_delay: f64,
    pub http_port: u16,
    pub sni_passthrough: bool,
}

impl Default for WebspaceConfig {
    fn default() -> Self {
        Self {
            startup_delay: 3.0,
            http_port: 80,
            sni_passthrough: false,
        }
    }
}

impl WebspaceConfig {
    /// Validates the invariants a loaded config blob must satisfy;
    /// violating `startup_delay >= 0` means the blob is corrupt.
    pub fn validate(&self) -> Result<()> {
        if self.startup_delay < 0.0 {
            return Err(Error::BadValue("startupDelay must not be negative".into()));
        }
        if self.http_port == 0 {
            return Err(Error::BadValue("httpPort must be 1-65535".into()));
        }
        Ok(())
    }
}

/// A webspace: the per-user entity this daemon reconciles against the edge.
///
/// `domains` never contains the synthesized default domain; see
/// [`Webspace::all_domains`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webspace {
    pub user_id: u64,
    pub config: WebspaceConfig,
    pub domains: Vec<String>,
    pub ports: HashMap<u16, u16>,
}

impl Webspace {
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            config: WebspaceConfig::default(),
            domains: Vec::new(),
            ports: HashMap::new(),
        }
    }

    /// The domain list as returned to API callers: the synthesized default
    /// domain first, followed by the stored custom domains.
    pub fn all_domains(&self, default_domain: &str) -> Vec<String> {
        let mut out = Vec::with_capacity(self.domains.len() + 1);
        out.push(default_domain.to_string());
        out.extend(self.domains.iter().cloned());
        out
    }

    /// Adds a custom domain to the stored set. Callers must have already
    /// verified DNS ownership and cross-webspace uniqueness; this only
    /// guards against re-adding the same domain twice and against adding
    /// the default domain itself.
    pub fn add_domain(&mut self, domain: &str, default_domain: &str) -> Result<()> {
        if domain.eq_ignore_ascii_case(default_domain) {
            return Err(Error::DefaultDomain);
        }
        if self.domains.iter().any(|d| d.eq_ignore_ascii_case(domain)) {
            return Err(Error::Exists);
        }
        self.domains.push(domain.to_string());
        Ok(())
    }

    /// Removes a custom domain. Order-insensitive (swap-and-truncate, as in
    /// the source) since domain order carries no meaning.
    pub fn remove_domain(&mut self, domain: &str, default_domain: &str) -> Result<()> {
        if domain.eq_ignore_ascii_case(default_domain) {
            return Err(Error::DefaultDomain);
        }
        let idx = self
            .domains
            .iter()
            .position(|d| d.eq_ignore_ascii_case(domain))
            .ok_or(Error::NotFound)?;
        self.domains.swap_remove(idx);
        Ok(())
    }

    /// Adds a port mapping. `external == 0` means "caller wants an
    /// auto-allocated port"; the caller (the engine, which knows the
    /// cross-webspace port set and the configured range) is responsible for
    /// picking the value and passing it in here already resolved. This
    /// method only enforces the per-webspace invariants: internal port
    /// non-zero and the `ports_max` cap.
    pub fn add_port(&mut self, external: u16, internal: u16, ports_max: usize) -> Result<()> {
        if internal == 0 {
            return Err(Error::BadPort);
        }
        if self.ports.len() >= ports_max && !self.ports.contains_key(&external) {
            return Err(Error::TooManyPorts);
        }
        self.ports.insert(external, internal);
        Ok(())
    }

    pub fn remove_port(&mut self, external: u16) -> Result<()> {
        if self.ports.remove(&external).is_none() {
            return Err(Error::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_source_defaults() {
        let cfg = WebspaceConfig::default();
        assert_eq!(cfg.startup_delay, 3.0);
        assert_eq!(cfg.http_port, 80);
        assert!(!cfg.sni_passthrough);
    }

    #[test]
    fn negative_startup_delay_is_rejected() {
        let cfg = WebspaceConfig {
            startup_delay: -1.0,
            ..WebspaceConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_domain_is_never_stored() {
        let w = Webspace::new(7);
        assert!(w.domains.is_empty());
        assert_eq!(w.all_domains("alice.ng.example"), vec!["alice.ng.example"]);
    }

    #[test]
    fn removing_default_domain_fails() {
        let mut w = Webspace::new(7);
        let err = w.remove_domain("alice.ng.example", "alice.ng.example");
        assert!(matches!(err, Err(Error::DefaultDomain)));
    }

    #[test]
    fn duplicate_domain_add_fails() {
        let mut w = Webspace::new(7);
        w.add_domain("foo.com", "alice.ng.example").unwrap();
        assert!(matches!(
            w.add_domain("foo.com", "alice.ng.example"),
            Err(Error::Exists)
        ));
    }

    #[test]
    fn port_cap_enforced() {
        let mut w = Webspace::new(7);
        for i in 0..4u16 {
            w.add_port(1000 + i, 22, 4).unwrap();
        }
        assert!(matches!(
            w.add_port(2000, 22, 4),
            Err(Error::TooManyPorts)
        ));
    }

    #[test]
    fn zero_internal_port_rejected() {
        let mut w = Webspace::new(7);
        assert!(matches!(w.add_port(1000, 0, 4), Err(Error::BadPort)));
    }

    #[test]
    fn remove_missing_port_errors() {
        let mut w = Webspace::new(7);
        assert!(matches!(w.remove_port(1000), Err(Error::NotFound)));
    }
}
