// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-frame wire shapes for the console and interactive-exec bridges
//! (§4.6). Text frames carry one of these as JSON; binary frames carry raw
//! PTY bytes and have no wire type of their own.

use serde::{Deserialize, Serialize};

/// Control frame for `GET .../console`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleControlFrame {
    pub width: u16,
    pub height: u16,
}

/// Control frame for `GET .../exec` (interactive). Both fields optional;
/// absent/zero means "do nothing" for that field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecControlFrame {
    #[serde(default)]
    pub resize: Option<ResizeRequest>,
    #[serde(default)]
    pub signal: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeRequest {
    pub width: u16,
    pub height: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_frame_parses() {
        let f: ConsoleControlFrame = serde_json::from_str(r#"{"width":80,"height":24}"#).unwrap();
        assert_eq!(f, ConsoleControlFrame { width: 80, height: 24 });
    }

    #[test]
    fn exec_frame_both_fields_optional() {
        let f: ExecControlFrame = serde_json::from_str("{}").unwrap();
        assert_eq!(f, ExecControlFrame::default());
    }

    #[test]
    fn exec_frame_parses_resize_and_signal() {
        let f: ExecControlFrame =
            serde_json::from_str(r#"{"resize":{"width":80,"height":24},"signal":2}"#).unwrap();
        assert_eq!(f.signal, Some(2));
        assert_eq!(f.resize, Some(ResizeRequest { width: 80, height: 24 }));
    }
}
