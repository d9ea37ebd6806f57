//! Rendered-manifest charts and the chart applier
//!
//! A chart here is a named set of already-rendered Kubernetes manifests. The
//! applier installs them with server-side apply (safe to reapply) and removes
//! them tolerating not-found, so both directions are idempotent. The built-in
//! chart grants the machine-controller-manager the RBAC it needs inside the
//! target cluster until a dedicated resource manager owns that.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

/// Field manager used for server-side apply of chart resources
pub const FIELD_MANAGER: &str = "trellis-extension";

/// A named set of rendered manifests
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Chart {
    /// Chart name, used in logs and error context
    pub name: String,
    /// The manifests the chart installs
    pub manifests: Vec<ChartManifest>,
}

/// One rendered manifest of a [`Chart`]
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartManifest {
    /// Full API version, e.g. "rbac.authorization.k8s.io/v1"
    pub api_version: String,
    /// Resource kind
    pub kind: String,
    /// Resource name
    pub name: String,
    /// Whether the resource is cluster-scoped
    #[serde(default)]
    pub cluster_scoped: bool,
    /// Fields other than apiVersion/kind/metadata (e.g. `rules`, `subjects`)
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub body: serde_json::Value,
}

impl ChartManifest {
    fn to_object(&self, namespace: &str) -> Result<DynamicObject> {
        let mut value = serde_json::json!({
            "apiVersion": self.api_version,
            "kind": self.kind,
            "metadata": { "name": self.name },
        });
        if !self.cluster_scoped {
            value["metadata"]["namespace"] = serde_json::Value::String(namespace.to_string());
        }
        if let serde_json::Value::Object(body) = &self.body {
            for (k, v) in body {
                value[k] = v.clone();
            }
        }
        serde_json::from_value(value).map_err(Error::serialization)
    }
}

/// Capability to install and remove chart resources against one cluster
///
/// One applier is bound to one cluster; the teardown loop uses a seed-side
/// applier plus a shoot-side applier obtained per request.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChartApplier: Send + Sync {
    /// Apply every manifest of the chart into the given namespace
    ///
    /// Cluster-scoped manifests ignore the namespace. Safe to reapply.
    async fn apply(&self, chart: &Chart, namespace: &str) -> Result<()>;

    /// Delete every manifest of the chart from the given namespace
    ///
    /// Resources already gone are not an error.
    async fn delete(&self, chart: &Chart, namespace: &str) -> Result<()>;
}

/// Chart applier backed by the Kubernetes API
pub struct KubeChartApplier {
    client: Client,
}

impl KubeChartApplier {
    /// Create a new applier using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api_for(&self, manifest: &ChartManifest, namespace: &str) -> Api<DynamicObject> {
        let ar = api_resource(&manifest.api_version, &manifest.kind);
        if manifest.cluster_scoped {
            Api::all_with(self.client.clone(), &ar)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        }
    }
}

#[async_trait]
impl ChartApplier for KubeChartApplier {
    async fn apply(&self, chart: &Chart, namespace: &str) -> Result<()> {
        for manifest in &chart.manifests {
            let obj = manifest.to_object(namespace)?;
            let api = self.api_for(manifest, namespace);
            api.patch(
                &manifest.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&obj),
            )
            .await?;
            debug!(chart = %chart.name, kind = %manifest.kind, name = %manifest.name, "Applied chart manifest");
        }
        Ok(())
    }

    async fn delete(&self, chart: &Chart, namespace: &str) -> Result<()> {
        for manifest in &chart.manifests {
            let api = self.api_for(manifest, namespace);
            match api.delete(&manifest.name, &DeleteParams::default()).await {
                Ok(_) => {
                    debug!(chart = %chart.name, kind = %manifest.kind, name = %manifest.name, "Deleted chart manifest");
                }
                Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Build an ApiResource from an apiVersion string and kind
///
/// The plural is derived naively (lowercase + "s"), which holds for every
/// kind the core installs; charts with irregular plurals should carry the
/// CRD's own list kind instead.
pub fn api_resource(api_version: &str, kind: &str) -> kube::discovery::ApiResource {
    let (group, version) = match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    };
    kube::discovery::ApiResource {
        group,
        version,
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        plural: format!("{}s", kind.to_lowercase()),
    }
}

/// The generic RBAC chart applied into the target cluster for the
/// machine-controller-manager
///
/// Stopgap until these roles are owned by a resource manager; reapplied on
/// every teardown because the apply is idempotent.
pub fn machine_controller_manager_shoot_chart() -> Chart {
    let rules = serde_json::json!([
        {
            "apiGroups": [""],
            "resources": ["nodes", "nodes/status", "endpoints", "events", "pods", "pods/eviction"],
            "verbs": ["create", "get", "list", "watch", "update", "patch", "delete"]
        },
        {
            "apiGroups": ["apps"],
            "resources": ["daemonsets", "deployments", "replicasets", "statefulsets"],
            "verbs": ["get", "list", "watch"]
        }
    ]);

    Chart {
        name: "machine-controller-manager-shoot".to_string(),
        manifests: vec![
            ChartManifest {
                api_version: "v1".to_string(),
                kind: "ServiceAccount".to_string(),
                name: "machine-controller-manager".to_string(),
                cluster_scoped: false,
                body: serde_json::Value::Null,
            },
            ChartManifest {
                api_version: "rbac.authorization.k8s.io/v1".to_string(),
                kind: "ClusterRole".to_string(),
                name: "system:machine-controller-manager".to_string(),
                cluster_scoped: true,
                body: serde_json::json!({ "rules": rules }),
            },
            ChartManifest {
                api_version: "rbac.authorization.k8s.io/v1".to_string(),
                kind: "ClusterRoleBinding".to_string(),
                name: "system:machine-controller-manager".to_string(),
                cluster_scoped: true,
                body: serde_json::json!({
                    "roleRef": {
                        "apiGroup": "rbac.authorization.k8s.io",
                        "kind": "ClusterRole",
                        "name": "system:machine-controller-manager"
                    },
                    "subjects": [{
                        "kind": "ServiceAccount",
                        "name": "machine-controller-manager",
                        "namespace": crate::SYSTEM_NAMESPACE
                    }]
                }),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_to_object_namespaced() {
        let manifest = ChartManifest {
            api_version: "v1".to_string(),
            kind: "ServiceAccount".to_string(),
            name: "machine-controller-manager".to_string(),
            cluster_scoped: false,
            body: serde_json::Value::Null,
        };

        let obj = manifest.to_object("kube-system").unwrap();
        assert_eq!(obj.metadata.name.as_deref(), Some("machine-controller-manager"));
        assert_eq!(obj.metadata.namespace.as_deref(), Some("kube-system"));
    }

    #[test]
    fn test_manifest_to_object_cluster_scoped_keeps_body() {
        let chart = machine_controller_manager_shoot_chart();
        let role = &chart.manifests[1];

        let obj = role.to_object("ignored").unwrap();
        assert_eq!(obj.metadata.namespace, None);
        assert!(obj.data["rules"].is_array());
    }

    #[test]
    fn test_api_resource_core_group() {
        let ar = api_resource("v1", "ServiceAccount");
        assert_eq!(ar.group, "");
        assert_eq!(ar.version, "v1");
        assert_eq!(ar.plural, "serviceaccounts");

        let ar = api_resource("rbac.authorization.k8s.io/v1", "ClusterRole");
        assert_eq!(ar.group, "rbac.authorization.k8s.io");
        assert_eq!(ar.plural, "clusterroles");
    }

    #[test]
    fn test_shoot_chart_shape() {
        let chart = machine_controller_manager_shoot_chart();
        assert_eq!(chart.manifests.len(), 3);
        assert!(chart.manifests.iter().any(|m| m.kind == "ClusterRoleBinding"));
    }
}
