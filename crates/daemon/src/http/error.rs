// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Maps the core error taxonomy onto HTTP status codes (§7). The hypervisor
//! client's own string-based mapping happens further down in
//! `wsd-adapters::hypervisor::map_error`; this layer only converts the
//! resulting `wsd_core::Error` to a response.

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use wsd_wire::ProblemResponse;

pub struct ApiError(pub wsd_core::Error);

impl From<wsd_core::Error> for ApiError {
    fn from(err: wsd_core::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        use wsd_core::Error::*;

        let status = match &self.0 {
            NotFound => StatusCode::NOT_FOUND,
            Exists | Used | Running => StatusCode::CONFLICT,
            BadValue(_) | BadPort | TooManyPorts | DefaultDomain | DomainUnverified => StatusCode::BAD_REQUEST,
            WebsocketRequired => StatusCode::BAD_REQUEST,
            TokenRequired | AdminRequired => StatusCode::UNAUTHORIZED,
            // Terminal-state mismatch is reported as absence by policy.
            NotRunning => StatusCode::NOT_FOUND,
            Interface | Address | EdgeProviderConfig | EdgeProvider(_) | UidMismatch | Hypervisor(_) | Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        }

        let body = Json(ProblemResponse {
            message: self.0.to_string(),
        });
        let mut response = (status, body).into_response();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/problem+json"));
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
