//! Cluster API boundary.
//!
//! The deployer only needs create, update and get for three resource kinds
//! plus a ReplicaSet listing, so the boundary is a narrow trait that a fake
//! can implement in tests.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{ListParams, PostParams};
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cluster api error: {0}")]
    Api(String),

    #[error("cluster unreachable: {0}")]
    Unreachable(String),
}

pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

impl ClusterError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists(_))
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 409 => ClusterError::AlreadyExists(resp.message),
            kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound(resp.message),
            kube::Error::Api(resp) => {
                ClusterError::Api(format!("{} ({}): {}", resp.reason, resp.code, resp.message))
            }
            other => ClusterError::Unreachable(other.to_string()),
        }
    }
}

impl From<ClusterError> for shipyard_core::Error {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::Unreachable(msg) => shipyard_core::Error::Unavailable(msg),
            ClusterError::NotFound(msg) => shipyard_core::Error::NotFound(msg),
            other => shipyard_core::Error::Deployment(other.to_string()),
        }
    }
}

/// Namespaced resource operations used by the Kubernetes deployer.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create_deployment(&self, namespace: &str, deployment: &Deployment)
    -> ClusterResult<Deployment>;
    async fn update_deployment(&self, namespace: &str, deployment: &Deployment)
    -> ClusterResult<Deployment>;
    async fn get_deployment(&self, namespace: &str, name: &str) -> ClusterResult<Deployment>;

    async fn create_service(&self, namespace: &str, service: &Service) -> ClusterResult<Service>;
    async fn update_service(&self, namespace: &str, service: &Service) -> ClusterResult<Service>;

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> ClusterResult<Ingress>;
    async fn update_ingress(&self, namespace: &str, ingress: &Ingress) -> ClusterResult<Ingress>;

    /// List ReplicaSets matching a label selector such as `app=web`.
    async fn list_replica_sets(&self, namespace: &str, selector: &str)
    -> ClusterResult<Vec<ReplicaSet>>;
}

/// [`ClusterClient`] backed by a kube client.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Connect using the in-cluster config or the local kubeconfig.
    pub async fn new() -> ClusterResult<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

async fn create_object<K>(api: Api<K>, obj: &K) -> ClusterResult<K>
where
    K: Clone + DeserializeOwned + Serialize + Debug,
{
    Ok(api.create(&PostParams::default(), obj).await?)
}

/// Replace the live object with `obj`, carrying over the live resourceVersion
/// and whatever fields `carry` copies across.
async fn replace_object<K>(api: Api<K>, obj: &K, carry: fn(&K, &mut K)) -> ClusterResult<K>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = obj
        .meta()
        .name
        .clone()
        .ok_or_else(|| ClusterError::Api("object has no name".to_string()))?;

    let live = api.get(&name).await?;
    let mut desired = obj.clone();
    desired.meta_mut().resource_version = live.meta().resource_version.clone();
    carry(&live, &mut desired);

    Ok(api.replace(&name, &PostParams::default(), &desired).await?)
}

fn keep_nothing<K>(_live: &K, _desired: &mut K) {}

/// clusterIP is immutable once allocated.
fn keep_cluster_ip(live: &Service, desired: &mut Service) {
    if let (Some(live_spec), Some(spec)) = (live.spec.as_ref(), desired.spec.as_mut()) {
        spec.cluster_ip = live_spec.cluster_ip.clone();
        spec.cluster_ips = live_spec.cluster_ips.clone();
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> ClusterResult<Deployment> {
        create_object(Api::namespaced(self.client.clone(), namespace), deployment).await
    }

    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> ClusterResult<Deployment> {
        replace_object(
            Api::namespaced(self.client.clone(), namespace),
            deployment,
            keep_nothing,
        )
        .await
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> ClusterResult<Deployment> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> ClusterResult<Service> {
        create_object(Api::namespaced(self.client.clone(), namespace), service).await
    }

    async fn update_service(&self, namespace: &str, service: &Service) -> ClusterResult<Service> {
        replace_object(
            Api::namespaced(self.client.clone(), namespace),
            service,
            keep_cluster_ip,
        )
        .await
    }

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> ClusterResult<Ingress> {
        create_object(Api::namespaced(self.client.clone(), namespace), ingress).await
    }

    async fn update_ingress(&self, namespace: &str, ingress: &Ingress) -> ClusterResult<Ingress> {
        replace_object(
            Api::namespaced(self.client.clone(), namespace),
            ingress,
            keep_nothing,
        )
        .await
    }

    async fn list_replica_sets(
        &self,
        namespace: &str,
        selector: &str,
    ) -> ClusterResult<Vec<ReplicaSet>> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items)
    }
}
