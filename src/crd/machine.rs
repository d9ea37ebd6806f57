//! Machine resource definitions
//!
//! These mirror the resources served by the external machine-controller-
//! manager: a MachineDeployment owns MachineSets which own Machines. The
//! core never creates these; during teardown it labels machines, issues
//! deletes, and watches the collections drain to zero.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a Machine
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "machine.trellis.dev",
    version = "v1alpha1",
    kind = "Machine",
    plural = "machines",
    namespaced,
    printcolumn = r#"{"name":"Class","type":"string","jsonPath":".spec.class.name"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Reference to the provider machine class the machine was created from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<ClassReference>,

    /// Provider identifier of the backing instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// Reference to a provider-specific machine class
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClassReference {
    /// Kind of the machine class resource
    pub kind: String,
    /// Name of the machine class resource
    pub name: String,
}

/// Specification for a MachineSet
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "machine.trellis.dev",
    version = "v1alpha1",
    kind = "MachineSet",
    plural = "machinesets",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetSpec {
    /// Desired number of machines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Template the machines are stamped from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<MachineTemplateSpec>,
}

/// Template for machines owned by a MachineSet or MachineDeployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineTemplateSpec {
    /// Machine spec stamped into each owned machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<MachineSpec>,
}

/// Specification for a MachineDeployment
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "machine.trellis.dev",
    version = "v1alpha1",
    kind = "MachineDeployment",
    plural = "machinedeployments",
    shortname = "mcd",
    status = "MachineDeploymentStatus",
    namespaced,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentSpec {
    /// Desired number of machines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Template the owned machine sets are stamped from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<MachineTemplateSpec>,
}

/// Status reported by the machine controller for a MachineDeployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentStatus {
    /// Number of machines currently backing the deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Machines whose last operation failed permanently
    ///
    /// A non-empty list during teardown is fatal: the machine controller has
    /// given up on these machines and a human has to look.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_machines: Vec<FailedMachine>,
}

/// A machine the controller could not converge
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailedMachine {
    /// Name of the failed machine
    pub name: String,

    /// Provider identifier of the backing instance, if one was created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// The operation that failed
    pub last_operation: LastOperation,
}

/// Outcome of the most recent operation the machine controller attempted
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    /// Human-readable description of what happened
    pub description: String,

    /// Terminal state of the operation (e.g. "Failed")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_machines_deserialize_from_status() {
        let status: MachineDeploymentStatus = serde_json::from_value(serde_json::json!({
            "replicas": 2,
            "failedMachines": [{
                "name": "pool-z1-abc",
                "providerId": "aws:///i-0abc",
                "lastOperation": {
                    "description": "cloud provider returned InsufficientInstanceCapacity",
                    "state": "Failed"
                }
            }]
        }))
        .unwrap();

        assert_eq!(status.failed_machines.len(), 1);
        assert_eq!(status.failed_machines[0].name, "pool-z1-abc");
        assert!(status.failed_machines[0]
            .last_operation
            .description
            .contains("InsufficientInstanceCapacity"));
    }

    #[test]
    fn test_empty_failed_machines_omitted() {
        let status = MachineDeploymentStatus {
            replicas: Some(0),
            failed_machines: Vec::new(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("failedMachines").is_none());
    }
}
