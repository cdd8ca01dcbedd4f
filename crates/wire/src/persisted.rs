// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The JSON shape stored in the reserved instance-config key. This is the
//! only persistent state the core owns of record.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use wsd_core::{Webspace, WebspaceConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedWebspace {
    pub user: u64,
    pub config: WebspaceConfig,
    pub domains: Vec<String>,
    pub ports: HashMap<u16, u16>,
}

impl From<&Webspace> for PersistedWebspace {
    fn from(w: &Webspace) -> Self {
        Self {
            user: w.user_id,
            config: w.config.clone(),
            domains: w.domains.clone(),
            ports: w.ports.clone(),
        }
    }
}

impl From<PersistedWebspace> for Webspace {
    fn from(p: PersistedWebspace) -> Self {
        Webspace {
            user_id: p.user,
            config: p.config,
            domains: p.domains,
            ports: p.ports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsd_core::test_support::WebspaceBuilder;

    #[test]
    fn round_trips_through_json() {
        let w = WebspaceBuilder::new(7)
            .with_domain("foo.com")
            .with_port(8080, 80)
            .build();
        let persisted = PersistedWebspace::from(&w);
        let json = serde_json::to_string(&persisted).unwrap();
        let back: PersistedWebspace = serde_json::from_str(&json).unwrap();
        assert_eq!(back, persisted);
        assert_eq!(Webspace::from(back), w);
    }

    #[test]
    fn config_fields_use_camel_case_keys() {
        let w = WebspaceBuilder::new(7).build();
        let persisted = PersistedWebspace::from(&w);
        let json = serde_json::to_value(&persisted).unwrap();
        assert!(json["config"]["startupDelay"].is_number());
        assert!(json["config"]["httpPort"].is_number());
        assert!(json["config"]["sniPassthrough"].is_boolean());
    }
}
