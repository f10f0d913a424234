//! Kubernetes deployer implementation.
//!
//! Each project maps to a Deployment, a ClusterIP Service and an Ingress, all
//! named after the project. Deploys are create-or-update; rollback reapplies
//! the pod template of the previous ReplicaSet revision.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, ReplicaSet};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, LocalObjectReference, PodSpec, PodTemplateSpec, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use regex::Regex;
use shipyard_config::DeployConfig;
use shipyard_core::{Build, Deployer, Error, Result};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, LazyLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cluster::{ClusterClient, ClusterResult, KubeClusterClient};

const SERVE_PORT: i32 = 80;
const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";
const CHANGE_CAUSE_ANNOTATION: &str = "kubernetes.io/change-cause";

static INVALID_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9-]+").expect("valid regex"));

/// Turn a project id into an RFC 1123 label usable as a resource name.
pub fn resource_name(project_id: &str) -> String {
    let lowered = project_id.to_lowercase();
    let replaced = INVALID_NAME_CHARS.replace_all(&lowered, "-");
    let mut name: String = replaced.trim_matches('-').chars().take(63).collect();
    while name.ends_with('-') {
        name.pop();
    }
    name
}

/// Kubernetes-based deployer.
pub struct KubernetesDeployer {
    client: Arc<dyn ClusterClient>,
    config: DeployConfig,
}

impl KubernetesDeployer {
    /// Connect to the cluster from the ambient kubeconfig.
    pub async fn connect(config: DeployConfig) -> Result<Self> {
        let client = KubeClusterClient::new().await?;
        Ok(Self::with_client(Arc::new(client), config))
    }

    pub fn with_client(client: Arc<dyn ClusterClient>, config: DeployConfig) -> Self {
        Self { client, config }
    }

    fn namespace(&self) -> &str {
        &self.config.namespace
    }

    fn labels(name: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("app".to_string(), name.to_string())])
    }

    fn meta(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.config.namespace.clone()),
            labels: Some(Self::labels(name)),
            ..Default::default()
        }
    }

    fn image(build: &Build) -> Result<&str> {
        build
            .image_id
            .as_deref()
            .filter(|image| !image.is_empty())
            .ok_or_else(|| Error::InvalidInput("image ID is required for kubernetes deployment".into()))
    }

    /// Qualify the image with the configured registry unless it already is.
    fn image_reference(&self, image: &str) -> String {
        match &self.config.registry {
            Some(registry) if !image.starts_with(registry.as_str()) => {
                format!("{}/{}", registry.trim_end_matches('/'), image)
            }
            _ => image.to_string(),
        }
    }

    pub fn deployment_for(&self, build: &Build) -> Result<Deployment> {
        let name = resource_name(&build.project_id);
        let image = self.image_reference(Self::image(build)?);

        let image_pull_secrets = self.config.pull_secret.as_ref().map(|secret| {
            vec![LocalObjectReference {
                name: secret.clone(),
            }]
        });

        Ok(Deployment {
            metadata: self.meta(&name),
            spec: Some(DeploymentSpec {
                replicas: Some(self.config.replica_count as i32),
                selector: LabelSelector {
                    match_labels: Some(Self::labels(&name)),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(Self::labels(&name)),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: name.clone(),
                            image: Some(image),
                            ports: Some(vec![ContainerPort {
                                container_port: SERVE_PORT,
                                ..Default::default()
                            }]),
                            ..Default::default()
                        }],
                        image_pull_secrets,
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    pub fn service_for(&self, build: &Build) -> Service {
        let name = resource_name(&build.project_id);

        Service {
            metadata: self.meta(&name),
            spec: Some(ServiceSpec {
                selector: Some(Self::labels(&name)),
                ports: Some(vec![ServicePort {
                    port: SERVE_PORT,
                    target_port: Some(IntOrString::Int(SERVE_PORT)),
                    ..Default::default()
                }]),
                type_: Some("ClusterIP".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn ingress_for(&self, build: &Build) -> Ingress {
        let name = resource_name(&build.project_id);
        let mut metadata = self.meta(&name);
        metadata.annotations = Some(BTreeMap::from([(
            "nginx.ingress.kubernetes.io/rewrite-target".to_string(),
            "/".to_string(),
        )]));

        Ingress {
            metadata,
            spec: Some(IngressSpec {
                rules: Some(vec![IngressRule {
                    host: Some(format!("{}.{}", name, self.config.ingress_domain)),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: Some("/".to_string()),
                            path_type: "Prefix".to_string(),
                            backend: IngressBackend {
                                service: Some(IngressServiceBackend {
                                    name: name.clone(),
                                    port: Some(ServiceBackendPort {
                                        number: Some(SERVE_PORT),
                                        ..Default::default()
                                    }),
                                }),
                                ..Default::default()
                            },
                        }],
                    }),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Create, falling back to an in-place update when the resource already exists.
///
/// `update` is only polled on the fallback path.
async fn create_or_update<T>(
    kind: &str,
    name: &str,
    create: impl Future<Output = ClusterResult<T>>,
    update: impl Future<Output = ClusterResult<T>>,
) -> Result<()> {
    match create.await {
        Ok(_) => {
            debug!(kind, name, "Created resource");
            Ok(())
        }
        Err(e) if e.is_already_exists() => {
            update.await.map_err(|e| {
                Error::Deployment(format!("failed to update {} {}: {}", kind, name, e))
            })?;
            debug!(kind, name, "Updated resource");
            Ok(())
        }
        Err(e) => Err(Error::Deployment(format!(
            "failed to create {} {}: {}",
            kind, name, e
        ))),
    }
}

/// Run a cluster step unless `cancel` fires first. An abandoned request leaves
/// nothing running locally; the API server applies it or not.
async fn unless_cancelled(
    cancel: &CancellationToken,
    step: impl Future<Output = Result<()>>,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = step => result,
    }
}

fn revision(replica_set: &ReplicaSet) -> i64 {
    replica_set
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(REVISION_ANNOTATION))
        .and_then(|r| r.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl Deployer for KubernetesDeployer {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    fn validate(&self, build: &Build) -> Result<()> {
        if build.project_id.is_empty() || resource_name(&build.project_id).is_empty() {
            return Err(Error::InvalidInput(
                "project ID is required for kubernetes deployment".into(),
            ));
        }
        Self::image(build)?;
        if self.config.namespace.is_empty() {
            return Err(Error::InvalidInput("kubernetes namespace is not configured".into()));
        }
        if self.config.ingress_domain.is_empty() {
            return Err(Error::InvalidInput("ingress domain is not configured".into()));
        }
        if self.config.replica_count < 1 {
            return Err(Error::InvalidInput("replica count must be at least 1".into()));
        }
        Ok(())
    }

    async fn deploy(&self, build: &Build, cancel: &CancellationToken) -> Result<()> {
        let ns = self.namespace();
        let name = resource_name(&build.project_id);
        info!(project = %build.project_id, namespace = %ns, image = ?build.image_id, "Deploying to kubernetes");

        let deployment = self.deployment_for(build)?;
        unless_cancelled(
            cancel,
            create_or_update(
                "deployment",
                &name,
                self.client.create_deployment(ns, &deployment),
                self.client.update_deployment(ns, &deployment),
            ),
        )
        .await?;

        let service = self.service_for(build);
        unless_cancelled(
            cancel,
            create_or_update(
                "service",
                &name,
                self.client.create_service(ns, &service),
                self.client.update_service(ns, &service),
            ),
        )
        .await?;

        let ingress = self.ingress_for(build);
        unless_cancelled(
            cancel,
            create_or_update(
                "ingress",
                &name,
                self.client.create_ingress(ns, &ingress),
                self.client.update_ingress(ns, &ingress),
            ),
        )
        .await?;

        info!(project = %build.project_id, host = %format!("{}.{}", name, self.config.ingress_domain), "Kubernetes deployment applied");
        Ok(())
    }

    async fn rollback(&self, build: &Build) -> Result<()> {
        let ns = self.namespace();
        let name = resource_name(&build.project_id);
        info!(project = %build.project_id, namespace = %ns, "Rolling back kubernetes deployment");

        let mut deployment = self.client.get_deployment(ns, &name).await?;

        let mut revisions = self
            .client
            .list_replica_sets(ns, &format!("app={}", name))
            .await?;
        if revisions.len() < 2 {
            return Err(Error::Deployment(
                "no previous revision available for rollback".into(),
            ));
        }
        revisions.sort_by_key(|rs| std::cmp::Reverse(revision(rs)));

        let previous = &revisions[1];
        let containers = previous
            .spec
            .as_ref()
            .and_then(|s| s.template.as_ref())
            .and_then(|t| t.spec.as_ref())
            .map(|s| s.containers.clone())
            .ok_or_else(|| {
                Error::Deployment(format!(
                    "revision {} has no pod template",
                    revision(previous)
                ))
            })?;

        let pod_spec = deployment
            .spec
            .as_mut()
            .and_then(|s| s.template.spec.as_mut())
            .ok_or_else(|| Error::Deployment(format!("deployment {} has no pod spec", name)))?;
        pod_spec.containers = containers;

        deployment
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(
                CHANGE_CAUSE_ANNOTATION.to_string(),
                format!("Rollback of build {} to revision {}", build.id, revision(previous)),
            );

        self.client
            .update_deployment(ns, &deployment)
            .await
            .map_err(|e| Error::Deployment(format!("failed to rollback deployment: {}", e)))?;

        info!(project = %build.project_id, revision = revision(previous), "Rolled back");
        Ok(())
    }
}
