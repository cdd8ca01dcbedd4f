// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer-token authentication (§6). The JWT's claims are never verified
//! locally — only used to name a subject — and the identity service is
//! re-asked on every request, so a revoked or edited account takes effect
//! immediately rather than at token expiry.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use wsd_adapters::identity::{decode_unverified, IdentityService, User};

use super::error::ApiError;
use super::AppState;

/// The calling subject, resolved and revalidated for this request.
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError(wsd_core::Error::TokenRequired))?;

        let claims = decode_unverified(token)?;
        let user = state.identity.resolve(&claims.sub).await?;
        Ok(AuthUser(user))
    }
}

/// Resolves a path's `{username}` segment to the target user, handling the
/// reserved `self` alias and the admin gate for cross-user access.
pub async fn resolve_target(
    identity: &dyn IdentityService,
    username: &str,
    caller: &User,
) -> wsd_core::Result<User> {
    if username == "self" {
        return Ok(caller.clone());
    }
    let target = identity.get_by_username(username).await?;
    if target.id != caller.id && !caller.is_admin {
        return Err(wsd_core::Error::AdminRequired);
    }
    Ok(target)
}
