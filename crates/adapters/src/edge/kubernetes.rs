// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Back-end B: structured cluster-resource store. Installs Traefik CRDs
//! (`IngressRoute`/`IngressRouteTCP`/`Middleware`/`MiddlewareTCP`) plus a
//! headless `Service`/`Endpoints` pair and, when custom domains and an
//! issuer are configured, a cert-manager `Certificate`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Endpoints, EndpointAddress, EndpointPort, EndpointSubset, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client, CustomResource};
use serde::{Deserialize, Serialize};

use super::{EdgeProvider, GenerateRequest};

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const MANAGED_BY_VALUE: &str = "webspaced";

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())])
}

fn managed_label_selector() -> String {
    format!("{MANAGED_BY_LABEL}={MANAGED_BY_VALUE}")
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebspaceBootSpec {
    pub url: String,
    #[serde(rename = "iamToken")]
    pub iam_token: String,
    #[serde(rename = "userID")]
    pub user_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlsDomain {
    pub main: String,
    #[serde(default)]
    pub sans: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouteTls {
    #[serde(rename = "secretName")]
    pub secret_name: String,
    pub domains: Vec<TlsDomain>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouteTlsTcp {
    pub passthrough: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerSpec {
    pub kind: String,
    pub name: String,
    pub port: IntOrString,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareRef {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub kind: String,
    #[serde(rename = "match")]
    pub match_: String,
    pub services: Vec<LoadBalancerSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub middlewares: Vec<MiddlewareRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTcp {
    pub name: String,
    pub port: IntOrString,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteTcp {
    #[serde(rename = "match")]
    pub match_: String,
    pub services: Vec<ServiceTcp>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub middlewares: Vec<MiddlewareRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, CustomResource)]
#[kube(
    group = "traefik.io",
    version = "v1alpha1",
    kind = "IngressRoute",
    namespaced
)]
pub struct IngressRouteSpec {
    #[serde(rename = "entryPoints")]
    pub entry_points: Vec<String>,
    pub routes: Vec<Route>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouteTls>,
}

#[derive(Debug, Clone, Serialize, Deserialize, CustomResource)]
#[kube(
    group = "traefik.io",
    version = "v1alpha1",
    kind = "IngressRouteTCP",
    namespaced
)]
pub struct IngressRouteTCPSpec {
    #[serde(rename = "entryPoints")]
    pub entry_points: Vec<String>,
    pub routes: Vec<RouteTcp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouteTlsTcp>,
}

#[derive(Debug, Clone, Serialize, Deserialize, CustomResource)]
#[kube(
    group = "traefik.io",
    version = "v1alpha1",
    kind = "Middleware",
    namespaced
)]
pub struct MiddlewareSpec {
    #[serde(rename = "webspaceBoot")]
    pub webspace_boot: WebspaceBootSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, CustomResource)]
#[kube(
    group = "traefik.io",
    version = "v1alpha1",
    kind = "MiddlewareTCP",
    namespaced
)]
pub struct MiddlewareTCPSpec {
    #[serde(rename = "webspaceBoot")]
    pub webspace_boot: WebspaceBootSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IssuerRef {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, CustomResource)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Certificate",
    namespaced
)]
pub struct CertificateSpec {
    #[serde(rename = "secretName")]
    pub secret_name: String,
    #[serde(rename = "dnsNames")]
    pub dns_names: Vec<String>,
    #[serde(rename = "issuerRef")]
    pub issuer_ref: IssuerRef,
}

#[derive(Debug, Clone)]
pub struct KubernetesEdgeConfig {
    pub namespace: String,
    pub https_entrypoint: String,
    pub default_secret: String,
    pub default_sans: Vec<String>,
    pub domain_base: String,
    pub cluster_issuer: Option<String>,
    pub webspaced_url: Option<String>,
    pub iam_token: String,
}

pub struct KubernetesEdgeProvider {
    client: Client,
    cfg: KubernetesEdgeConfig,
}

impl KubernetesEdgeProvider {
    pub fn new(client: Client, cfg: KubernetesEdgeConfig) -> Self {
        Self { client, cfg }
    }

    fn ns<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
            + Clone
            + std::fmt::Debug
            + for<'de> Deserialize<'de>
            + Serialize,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.cfg.namespace)
    }

    async fn delete_if_present<K>(&self, api: &Api<K>, name: &str) -> wsd_core::Result<()>
    where
        K: Clone + std::fmt::Debug + for<'de> Deserialize<'de>,
    {
        match api.get(name).await {
            Ok(_) => {
                api.delete(name, &DeleteParams::default())
                    .await
                    .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))?;
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(wsd_core::Error::EdgeProvider(e.to_string())),
        }
    }
}

#[async_trait]
impl EdgeProvider for KubernetesEdgeProvider {
    async fn clear_all(&self) -> wsd_core::Result<()> {
        let lp = ListParams::default().labels(&managed_label_selector());
        let dp = DeleteParams::default();

        let ir_tcp: Api<IngressRouteTCP> = self.ns();
        ir_tcp
            .delete_collection(&dp, &lp)
            .await
            .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))?;

        let ir: Api<IngressRoute> = self.ns();
        ir.delete_collection(&dp, &lp)
            .await
            .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))?;

        let mw_tcp: Api<MiddlewareTCP> = self.ns();
        mw_tcp
            .delete_collection(&dp, &lp)
            .await
            .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))?;

        let mw: Api<Middleware> = self.ns();
        mw.delete_collection(&dp, &lp)
            .await
            .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))?;

        let certs: Api<Certificate> = self.ns();
        certs
            .delete_collection(&dp, &lp)
            .await
            .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))?;

        let svcs: Api<Service> = self.ns();
        let list = svcs
            .list(&lp)
            .await
            .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))?;
        for svc in list.items {
            if let Some(name) = svc.metadata.name {
                self.delete_if_present(&svcs, &name).await?;
            }
        }

        let eps: Api<Endpoints> = self.ns();
        eps.delete_collection(&dp, &lp)
            .await
            .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))?;

        Ok(())
    }

    async fn clear_config(&self, instance_name: &str) -> wsd_core::Result<()> {
        let n = instance_name;
        let boot = format!("{n}-boot");
        let tls_name = format!("tls-{n}");

        self.delete_if_present(&self.ns::<IngressRouteTCP>(), n).await?;
        self.delete_if_present(&self.ns::<IngressRoute>(), n).await?;
        self.delete_if_present(&self.ns::<MiddlewareTCP>(), &boot).await?;
        self.delete_if_present(&self.ns::<Middleware>(), &boot).await?;
        self.delete_if_present(&self.ns::<Certificate>(), &tls_name).await?;
        self.delete_if_present(&self.ns::<Service>(), n).await?;
        self.delete_if_present(&self.ns::<Endpoints>(), n).await?;
        Ok(())
    }

    async fn generate_config(&self, req: GenerateRequest<'_>) -> wsd_core::Result<()> {
        if req.backend_addr.is_empty() && self.cfg.webspaced_url.is_none() {
            return Ok(());
        }

        let n = req.instance_name;
        let labels = managed_labels();
        let http_port = req.webspace.config.http_port as i32;
        let ip = if req.backend_addr.is_empty() {
            "1.1.1.1".to_string()
        } else {
            req.backend_addr.to_string()
        };

        let endpoints = Endpoints {
            metadata: ObjectMeta {
                name: Some(n.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![EndpointAddress {
                    ip,
                    ..Default::default()
                }]),
                ports: Some(vec![EndpointPort {
                    name: Some("http".into()),
                    port: http_port,
                    protocol: Some("TCP".into()),
                    ..Default::default()
                }]),
                not_ready_addresses: None,
            }]),
        };
        self.ns::<Endpoints>()
            .create(&PostParams::default(), &endpoints)
            .await
            .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))?;

        let service = Service {
            metadata: ObjectMeta {
                name: Some(n.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: Some("None".into()),
                ports: Some(vec![ServicePort {
                    name: Some("http".into()),
                    port: http_port,
                    protocol: Some("TCP".into()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        };
        self.ns::<Service>()
            .create(&PostParams::default(), &service)
            .await
            .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))?;

        let boot_spec = WebspaceBootSpec {
            url: self.cfg.webspaced_url.clone().unwrap_or_default(),
            iam_token: self.cfg.iam_token.clone(),
            user_id: req.webspace.user_id,
        };

        if !req.webspace.config.sni_passthrough {
            let tls = if req.webspace.domains.is_empty() || self.cfg.cluster_issuer.is_none() {
                RouteTls {
                    secret_name: self.cfg.default_secret.clone(),
                    domains: vec![TlsDomain {
                        main: format!("*.{}", self.cfg.domain_base),
                        sans: self.cfg.default_sans.clone(),
                    }],
                }
            } else {
                let secret = format!("tls-{n}");
                let cert = Certificate::new(
                    &secret,
                    CertificateSpec {
                        secret_name: secret.clone(),
                        dns_names: req.webspace.domains.clone(),
                        issuer_ref: IssuerRef {
                            kind: "ClusterIssuer".into(),
                            name: self.cfg.cluster_issuer.clone().unwrap_or_default(),
                        },
                    },
                );
                let mut cert = cert;
                cert.metadata.labels = Some(labels.clone());
                self.ns::<Certificate>()
                    .create(&PostParams::default(), &cert)
                    .await
                    .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))?;

                RouteTls {
                    secret_name: secret,
                    domains: vec![TlsDomain {
                        main: format!("{}.{}", req.username, self.cfg.domain_base),
                        sans: req.webspace.domains.clone(),
                    }],
                }
            };

            let mut middlewares = Vec::new();
            if req.backend_addr.is_empty() {
                let mw = Middleware::new(
                    &format!("{n}-boot"),
                    MiddlewareSpec {
                        webspace_boot: boot_spec,
                    },
                );
                let mut mw = mw;
                mw.metadata.labels = Some(labels.clone());
                self.ns::<Middleware>()
                    .create(&PostParams::default(), &mw)
                    .await
                    .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))?;
                middlewares.push(MiddlewareRef {
                    name: format!("{n}-boot"),
                });
            }

            let ir = IngressRoute::new(
                n,
                IngressRouteSpec {
                    entry_points: vec![self.cfg.https_entrypoint.clone()],
                    routes: vec![Route {
                        kind: "Rule".into(),
                        match_: super::host_rule(req.domains),
                        services: vec![LoadBalancerSpec {
                            kind: "Service".into(),
                            name: n.to_string(),
                            port: IntOrString::Int(http_port),
                        }],
                        middlewares,
                    }],
                    tls: Some(tls),
                },
            );
            let mut ir = ir;
            ir.metadata.labels = Some(labels);
            self.ns::<IngressRoute>()
                .create(&PostParams::default(), &ir)
                .await
                .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))?;
        } else {
            let mut middlewares = Vec::new();
            if req.backend_addr.is_empty() {
                let mw = MiddlewareTCP::new(
                    &format!("{n}-boot"),
                    MiddlewareTCPSpec {
                        webspace_boot: boot_spec,
                    },
                );
                let mut mw = mw;
                mw.metadata.labels = Some(labels.clone());
                self.ns::<MiddlewareTCP>()
                    .create(&PostParams::default(), &mw)
                    .await
                    .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))?;
                middlewares.push(MiddlewareRef {
                    name: format!("{n}-boot"),
                });
            }

            let ir = IngressRouteTCP::new(
                n,
                IngressRouteTCPSpec {
                    entry_points: vec![self.cfg.https_entrypoint.clone()],
                    routes: vec![RouteTcp {
                        match_: super::host_sni_rule(req.domains),
                        services: vec![ServiceTcp {
                            name: n.to_string(),
                            port: IntOrString::Int(http_port),
                        }],
                        middlewares,
                    }],
                    tls: Some(RouteTlsTcp { passthrough: true }),
                },
            );
            let mut ir = ir;
            ir.metadata.labels = Some(labels);
            self.ns::<IngressRouteTCP>()
                .create(&PostParams::default(), &ir)
                .await
                .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_label_selector_matches_managed_by_label() {
        assert_eq!(
            managed_label_selector(),
            "app.kubernetes.io/managed-by=webspaced"
        );
    }
}
