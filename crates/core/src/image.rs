// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The read-only image type, surfaced verbatim from the hypervisor's image
//! list.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub aliases: Vec<String>,
    /// sha-256 hex digest.
    pub fingerprint: String,
    pub properties: HashMap<String, String>,
    pub size: u64,
}

impl Image {
    /// The `os` property, if present, used to select an SSH-install preset
    /// at webspace creation time.
    pub fn os(&self) -> Option<&str> {
        self.properties.get("os").map(String::as_str)
    }
}
