//! Worker Custom Resource Definition
//!
//! A Worker is a request to converge or destroy a named pool of
//! externally-provisioned machines for one control-plane namespace. It is
//! created by a higher-level reconciler; the core consumes it once per call
//! and relies on idempotent re-invocation instead of internal retries.

use k8s_openapi::api::core::v1::SecretReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a Worker
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "extensions.trellis.dev",
    version = "v1alpha1",
    kind = "Worker",
    plural = "workers",
    namespaced,
    printcolumn = r#"{"name":"Region","type":"string","jsonPath":".spec.region"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSpec {
    /// Reference to the secret holding provider credentials
    pub secret_ref: SecretReference,

    /// Provider region the machines live in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// The worker pools to converge
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pools: Vec<WorkerPool>,
}

/// One homogeneous pool of worker machines
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPool {
    /// Pool name, unique within the Worker
    pub name: String,

    /// Provider machine type (e.g. "m5.large")
    pub machine_type: String,

    /// Minimum number of machines
    pub minimum: u32,

    /// Maximum number of machines
    pub maximum: u32,

    /// Availability zones the pool spreads over
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_spec_roundtrip() {
        let spec = WorkerSpec {
            secret_ref: SecretReference {
                name: Some("cloudprovider".to_string()),
                namespace: Some("shoot--foo--bar".to_string()),
            },
            region: Some("eu-west-1".to_string()),
            pools: vec![WorkerPool {
                name: "cpu-worker".to_string(),
                machine_type: "m5.large".to_string(),
                minimum: 2,
                maximum: 5,
                zones: vec!["eu-west-1a".to_string()],
            }],
        };

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["secretRef"]["name"], "cloudprovider");
        assert_eq!(json["pools"][0]["machineType"], "m5.large");

        let back: WorkerSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);
    }
}
