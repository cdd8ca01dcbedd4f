// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Verbatim mapping from the hypervisor client's string-based errors to the
//! webspace error taxonomy.
//!
//! Preserved exact-match, not substring, because callers depend on the
//! specific set of strings the source recognizes. Any change here needs a
//! regression test alongside it.

use wsd_core::Error;

/// Maps a raw error string from the hypervisor client transport to the
/// taxonomy. Unrecognized strings become `Error::Hypervisor(msg)`, a 500.
pub fn map_error(msg: &str) -> Error {
    match msg {
        "API endpoint not found" => Error::NotFound,
        "method not allowed on API endpoint" => Error::Hypervisor(msg.to_string()),
        "token required for this endpoint" => Error::TokenRequired,
        "only admin users can make use of this endpoint" => Error::AdminRequired,
        "not found" => Error::NotFound,
        "already exists" => Error::Exists,
        "used by a webspace" => Error::Used,
        "not running" => Error::NotRunning,
        "already running" => Error::Running,
        "verification failed" => Error::DomainUnverified,
        "cannot remove the default domain" => Error::DefaultDomain,
        "port forward limit reached" => Error::TooManyPorts,
        "invalid port" => Error::BadPort,
        "default network interface not present" => Error::Interface,
        "IPv4 address not found" => Error::Address,
        "invalid value for configuration option" => Error::BadValue(msg.to_string()),
        "user id doesn't match provided value" => Error::UidMismatch,
        "invalid Traefik provider" => Error::EdgeProviderConfig,
        "this endpoint supports websocket communication only" => Error::WebsocketRequired,
        other => Error::Hypervisor(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_every_known_string() {
        assert!(matches!(map_error("not found"), Error::NotFound));
        assert!(matches!(map_error("already exists"), Error::Exists));
        assert!(matches!(map_error("used by a webspace"), Error::Used));
        assert!(matches!(map_error("already running"), Error::Running));
        assert!(matches!(map_error("not running"), Error::NotRunning));
        assert!(matches!(
            map_error("verification failed"),
            Error::DomainUnverified
        ));
        assert!(matches!(
            map_error("cannot remove the default domain"),
            Error::DefaultDomain
        ));
        assert!(matches!(
            map_error("port forward limit reached"),
            Error::TooManyPorts
        ));
        assert!(matches!(map_error("invalid port"), Error::BadPort));
        assert!(matches!(
            map_error("default network interface not present"),
            Error::Interface
        ));
        assert!(matches!(map_error("IPv4 address not found"), Error::Address));
        assert!(matches!(
            map_error("user id doesn't match provided value"),
            Error::UidMismatch
        ));
        assert!(matches!(
            map_error("invalid Traefik provider"),
            Error::EdgeProviderConfig
        ));
        assert!(matches!(
            map_error("this endpoint supports websocket communication only"),
            Error::WebsocketRequired
        ));
    }

    #[test]
    fn unrecognized_string_falls_through_to_hypervisor_error() {
        assert!(matches!(map_error("disk full"), Error::Hypervisor(_)));
    }
}
