// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The edge configuration provider abstraction (§4.2): a single contract,
//! two interchangeable back-ends.

pub mod kubernetes;
pub mod redis;

use async_trait::async_trait;
use wsd_core::Webspace;

/// Inputs `GenerateConfig` needs beyond the webspace itself: the resolved
/// username (for the default-domain rule and SSL-termination host) and the
/// full domain list (default + custom), computed by the caller so this
/// layer never has to resolve identities itself.
pub struct GenerateRequest<'a> {
    pub instance_name: &'a str,
    pub username: &'a str,
    pub domains: &'a [String],
    pub webspace: &'a Webspace,
    /// Empty string means "not running"; see the hook-installation rule.
    pub backend_addr: &'a str,
}

#[async_trait]
pub trait EdgeProvider: Send + Sync {
    async fn clear_all(&self) -> wsd_core::Result<()>;
    async fn clear_config(&self, instance_name: &str) -> wsd_core::Result<()>;
    async fn generate_config(&self, req: GenerateRequest<'_>) -> wsd_core::Result<()>;
}

/// Builds the Traefik host-match rule used by both back-ends:
/// `Host(`d1`) || Host(`d2`) ...`.
pub(crate) fn host_rule(domains: &[String]) -> String {
    domains
        .iter()
        .map(|d| format!("Host(`{d}`)"))
        .collect::<Vec<_>>()
        .join(" || ")
}

/// The SNI-passthrough equivalent: `HostSNI(`d1`) || HostSNI(`d2`) ...`.
pub(crate) fn host_sni_rule(domains: &[String]) -> String {
    domains
        .iter()
        .map(|d| format!("HostSNI(`{d}`)"))
        .collect::<Vec<_>>()
        .join(" || ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_rule_joins_with_or() {
        let domains = vec!["a.com".to_string(), "b.com".to_string()];
        assert_eq!(host_rule(&domains), "Host(`a.com`) || Host(`b.com`)");
    }

    #[test]
    fn sni_rule_joins_with_or() {
        let domains = vec!["a.com".to_string()];
        assert_eq!(host_sni_rule(&domains), "HostSNI(`a.com`)");
    }
}
