// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic naming rules that tie a webspace to its hypervisor instance
//! and to the lifecycle events the instance emits.

use std::sync::OnceLock;

use regex::Regex;

/// Builds the hypervisor instance name for a user id, given the configured
/// instance prefix (e.g. `"ws-"` yields `ws-u7` for user 7).
pub fn instance_name(prefix: &str, uid: u64) -> String {
    format!("{prefix}u{uid}")
}

/// Builds the default (synthesized, never stored) domain for a username.
pub fn default_domain(username: &str, domain_base: &str) -> String {
    format!("{username}.{domain_base}")
}

/// Builds the DNS TXT record value a custom domain must carry to verify
/// ownership for a given user id.
pub fn domain_verification_record(uid: u64) -> String {
    format!("webspace:id:{uid}")
}

fn source_regex(prefix: &str) -> Regex {
    // Matches `/1.0/<anything>/<prefix>u<uid>`, capturing `uid`.
    let escaped = regex_escape(prefix);
    Regex::new(&format!(r"^/1\.0/\S+/{escaped}u(\d+)$")).expect("static pattern is valid")
}

fn action_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\S+-(\S+)$").expect("static pattern is valid"))
}

fn regex_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Extracts the user id from a lifecycle event's `source` field, given the
/// configured instance prefix. Returns `None` if the source does not belong
/// to a webspace instance this manager owns.
pub fn parse_source_uid(prefix: &str, source: &str) -> Option<u64> {
    source_regex(prefix)
        .captures(source)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// The recognized lifecycle action suffixes. `Unknown` carries the raw
/// suffix so the caller can log it without a lossy match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleAction {
    Created,
    Started,
    Restarted,
    Shutdown,
    Updated,
    Deleted,
    Unknown(String),
}

impl LifecycleAction {
    /// Parses the action suffix out of a raw hypervisor action string
    /// (e.g. `"instance-started"` → `Started`).
    pub fn parse(action: &str) -> Option<Self> {
        let suffix = action_regex().captures(action)?.get(1)?.as_str();
        Some(match suffix {
            "created" => Self::Created,
            "started" => Self::Started,
            "restarted" => Self::Restarted,
            "shutdown" => Self::Shutdown,
            "updated" => Self::Updated,
            "deleted" => Self::Deleted,
            other => Self::Unknown(other.to_string()),
        })
    }

    /// The running-state this action implies, per the derivation table.
    /// `None` means "query the hypervisor for current state" (the `updated`
    /// case); `Deleted` has no running-state since regeneration is skipped.
    pub fn implied_running(&self) -> Option<bool> {
        match self {
            Self::Started | Self::Restarted => Some(true),
            Self::Shutdown | Self::Created => Some(false),
            Self::Updated | Self::Unknown(_) | Self::Deleted => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_name_matches_prefix_convention() {
        assert_eq!(instance_name("ws-", 7), "ws-u7");
    }

    #[test]
    fn default_domain_format() {
        assert_eq!(default_domain("alice", "ng.example"), "alice.ng.example");
    }

    #[test]
    fn verification_record_format() {
        assert_eq!(domain_verification_record(7), "webspace:id:7");
    }

    #[test]
    fn parses_source_uid() {
        assert_eq!(parse_source_uid("ws-", "/1.0/instances/ws-u7"), Some(7));
        assert_eq!(parse_source_uid("ws-", "/1.0/instances/other-u7"), None);
        assert_eq!(parse_source_uid("ws-", "garbage"), None);
    }

    #[test]
    fn parses_known_actions() {
        assert_eq!(
            LifecycleAction::parse("instance-started"),
            Some(LifecycleAction::Started)
        );
        assert_eq!(
            LifecycleAction::parse("instance-updated"),
            Some(LifecycleAction::Updated)
        );
        assert_eq!(
            LifecycleAction::parse("instance-frobnicated"),
            Some(LifecycleAction::Unknown("frobnicated".into()))
        );
    }

    #[test]
    fn running_state_derivation_table() {
        assert_eq!(LifecycleAction::Started.implied_running(), Some(true));
        assert_eq!(LifecycleAction::Restarted.implied_running(), Some(true));
        assert_eq!(LifecycleAction::Shutdown.implied_running(), Some(false));
        assert_eq!(LifecycleAction::Created.implied_running(), Some(false));
        assert_eq!(LifecycleAction::Updated.implied_running(), None);
        assert_eq!(LifecycleAction::Deleted.implied_running(), None);
    }
}
