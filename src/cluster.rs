//! Cluster context resolution
//!
//! Every control-plane namespace belongs to exactly one cluster. The Cluster
//! resource is cluster-scoped and named after that namespace; it carries the
//! raw payloads (cloud profile, seed, shoot) a provider needs to make
//! decisions. The core resolves it before any provider call that requires
//! cluster context: etcd stateful set mutation and worker deletion.

use async_trait::async_trait;
use kube::api::Api;
use kube::{Client, CustomResource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Specification for a Cluster context object
///
/// The payloads are opaque to the core; providers decode the parts they
/// understand. Keeping them raw avoids coupling the core to the shapes of
/// resources it never interprets.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "extensions.trellis.dev",
    version = "v1alpha1",
    kind = "Cluster",
    plural = "clusters"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Raw cloud profile the cluster was created from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_profile: Option<serde_json::Value>,

    /// Raw seed the control plane runs on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<serde_json::Value>,

    /// Raw shoot definition of the target cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shoot: Option<serde_json::Value>,
}

/// Capability to resolve the cluster context owning a namespace
///
/// Injected into the mutation dispatcher and available to actuator wiring;
/// mocked in tests so dispatch logic runs without an API server.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterLookup: Send + Sync {
    /// Resolve the Cluster object for the given control-plane namespace
    async fn cluster_for_namespace(&self, namespace: &str) -> Result<Cluster>;
}

/// Cluster lookup backed by the Kubernetes API
///
/// The Cluster resource is cluster-scoped and shares its name with the
/// control-plane namespace, so resolution is a single get.
pub struct KubeClusterLookup {
    client: Client,
}

impl KubeClusterLookup {
    /// Create a new lookup using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterLookup for KubeClusterLookup {
    async fn cluster_for_namespace(&self, namespace: &str) -> Result<Cluster> {
        let api: Api<Cluster> = Api::all(self.client.clone());
        Ok(api.get(namespace).await?)
    }
}
