// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The HTTP/WebSocket surface (§6): route table, auth middleware, and the
//! error-to-status mapping.

pub mod auth;
pub mod error;
mod handlers;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use wsd_adapters::identity::IdentityService;
use wsd_engine::Manager;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
    pub identity: Arc<dyn IdentityService>,
}

pub fn router(manager: Arc<Manager>, identity: Arc<dyn IdentityService>, cfg: &Config) -> Router {
    let state = AppState { manager, identity };

    Router::new()
        .route("/v1/images", get(handlers::list_images))
        .route(
            "/v1/webspace/{username}",
            get(handlers::get_webspace)
                .post(handlers::create_webspace)
                .delete(handlers::delete_webspace),
        )
        .route(
            "/v1/webspace/{username}/state",
            get(handlers::get_state)
                .post(handlers::boot)
                .patch(handlers::sync)
                .put(handlers::reboot)
                .delete(handlers::shutdown_webspace),
        )
        .route(
            "/v1/webspace/{username}/config",
            get(handlers::get_config).patch(handlers::patch_config),
        )
        .route("/v1/webspace/{username}/domains", get(handlers::get_domains))
        .route(
            "/v1/webspace/{username}/domains/{domain}",
            post(handlers::add_domain).delete(handlers::remove_domain),
        )
        .route("/v1/webspace/{username}/ports", get(handlers::get_ports))
        .route(
            "/v1/webspace/{username}/ports/{e_port}/{i_port}",
            post(handlers::add_port_explicit),
        )
        .route(
            "/v1/webspace/{username}/ports/{port}",
            post(handlers::add_port_auto).delete(handlers::remove_port),
        )
        .route(
            "/v1/webspace/{username}/log",
            get(handlers::get_log).delete(handlers::clear_log),
        )
        .route("/v1/webspace/{username}/console", get(handlers::console))
        .route(
            "/v1/webspace/{username}/exec",
            post(handlers::exec).get(handlers::exec_interactive),
        )
        .route("/internal/{username}/ensure-started", post(handlers::ensure_started))
        .route("/health", get(handlers::health))
        .layer(cors_layer(cfg))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(cfg: &Config) -> CorsLayer {
    let origin = if cfg.http.cors_allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = cfg
            .http
            .cors_allowed_origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(Duration::from_secs(3600))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use wsd_adapters::edge::{EdgeProvider, GenerateRequest};
    use wsd_adapters::hypervisor::fake::FakeHypervisor;
    use wsd_adapters::identity::fake::FakeIdentityService;
    use wsd_adapters::identity::User;
    use wsd_engine::forwarder::PortForwarder;
    use wsd_engine::EngineConfig;

    /// An edge provider that records nothing and fails nothing; the HTTP
    /// layer's behavior is what these tests exercise, not reconciliation.
    #[derive(Default)]
    struct NullEdgeProvider;

    #[async_trait]
    impl EdgeProvider for NullEdgeProvider {
        async fn clear_all(&self) -> wsd_core::Result<()> {
            Ok(())
        }

        async fn clear_config(&self, _instance_name: &str) -> wsd_core::Result<()> {
            Ok(())
        }

        async fn generate_config(&self, _req: GenerateRequest<'_>) -> wsd_core::Result<()> {
            Ok(())
        }
    }

    /// An unverified HS256 token carrying `{"sub": subject}`; `decode_unverified`
    /// never checks the signature, so the third segment is a placeholder.
    fn bearer_token(subject: &str) -> String {
        use base64::Engine;
        let b64 = |s: &str| base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(s);
        let header = b64(r#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = b64(&format!(r#"{{"sub":"{subject}"}}"#));
        format!("{header}.{payload}.ignored-signature")
    }

    async fn test_app() -> Router {
        let hypervisor = Arc::new(FakeHypervisor::new());
        let identity = Arc::new(
            FakeIdentityService::default().with_user(User {
                id: 1,
                username: "alice".into(),
                is_admin: false,
            }),
        );
        let edge = Arc::new(NullEdgeProvider);
        let forwarder = Arc::new(PortForwarder::new(None));
        let manager = Arc::new(Manager::new(
            hypervisor,
            edge,
            identity.clone(),
            forwarder,
            EngineConfig {
                instance_prefix: "ws-".into(),
                config_key: "user.webspace".into(),
                domain_base: "webspaces.example".into(),
                ports: wsd_engine::PortsConfig {
                    start: 49152,
                    end: 65535,
                    max: 16,
                    kubernetes_service: None,
                },
                ip_timeout: Duration::from_secs(5),
                instance_profile: "webspace".into(),
                config_defaults: wsd_core::WebspaceConfig::default(),
            },
        ));
        manager.start().await.unwrap();

        let cfg = Config::default();
        router(manager, identity, &cfg)
    }

    #[tokio::test]
    async fn health_is_ok_once_started() {
        let app = test_app().await;
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn create_then_get_webspace_round_trips() {
        let app = test_app().await;
        let token = bearer_token("alice");

        let create = Request::builder()
            .method("POST")
            .uri("/v1/webspace/self")
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"image":"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa","ssh":false}"#,
            ))
            .unwrap();
        let resp = app.clone().oneshot(create).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::CREATED);

        let get = Request::builder()
            .method("GET")
            .uri("/v1/webspace/alice")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(get).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["user"], 1);
        assert_eq!(json["domains"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn missing_bearer_token_is_rejected() {
        let app = test_app().await;
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/v1/webspace/self")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_target_user_is_not_found() {
        let app = test_app().await;
        let token = bearer_token("alice");
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/v1/webspace/bob")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
