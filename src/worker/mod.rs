//! The `WorkerDelegate` capability and the teardown loop
//!
//! A provider implements [`DelegateFactory`] to hand the core a
//! [`WorkerDelegate`] scoped to one worker request. The delegate is the only
//! place provider specifics enter the teardown: which machine-class resource
//! to enumerate, and any extra bootstrap chart to install alongside the
//! generic RBAC one.

mod actuator;
mod store;
mod wait;

pub use actuator::{ActuatorConfig, WorkerActuator};
pub use store::{KubeMachineStore, KubeShootClientFactory, MachineStore, ShootClientFactory};
pub use wait::{poll_until, PollTick, Tick, WaitOutcome};

use async_trait::async_trait;
use kube::discovery::ApiResource;

#[cfg(test)]
use mockall::automock;

use crate::chart::Chart;
use crate::cluster::Cluster;
use crate::crd::Worker;
use crate::Result;

/// Provider capability scoped to one worker request
///
/// Supplies the provider-specific machine-class resource for enumeration and
/// deletion, plus an optional bootstrap chart installed into the target
/// cluster together with the generic controller RBAC.
#[cfg_attr(test, automock)]
pub trait WorkerDelegate: Send + Sync {
    /// The provider's machine-class resource (e.g. `AWSMachineClass`)
    fn machine_class_resource(&self) -> ApiResource;

    /// Additional provider bootstrap chart for the target cluster, if any
    fn bootstrap_chart(&self) -> Option<Chart> {
        None
    }
}

/// Factory producing a [`WorkerDelegate`] bound to one worker and cluster
///
/// Called once at the start of every reconciliation or deletion request; a
/// construction failure is a setup error and aborts the request immediately.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DelegateFactory: Send + Sync {
    /// Build the delegate for the given worker and its cluster context
    async fn worker_delegate(
        &self,
        worker: &Worker,
        cluster: &Cluster,
    ) -> Result<Box<dyn WorkerDelegate>>;
}
