//! The `Ensurer` capability and the mutation dispatcher
//!
//! Providers implement [`Ensurer`] to adjust well-known control-plane objects
//! to their requirements; the [`Mutator`] owns the routing and the
//! decode/mutate/encode round trips for embedded payloads so providers only
//! ever see structured values. Every hook has a no-op default, so a provider
//! implements exactly the hooks it cares about.

mod mutator;

pub use mutator::{Mutator, TargetObject};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Service;

#[cfg(test)]
use mockall::automock;

use crate::cluster::Cluster;
use crate::codec::{KubeletConfiguration, UnitOption};
use crate::Result;

/// Provider capability to make control-plane objects conform to provider
/// requirements
///
/// The core holds only this abstraction, never a concrete provider type. All
/// hooks mutate their argument in place except the kubelet unit options hook,
/// which returns the (possibly re-allocated) option list.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Ensurer: Send + Sync {
    /// Adjust the kube-apiserver service
    async fn ensure_kube_apiserver_service(&self, _service: &mut Service) -> Result<()> {
        Ok(())
    }

    /// Adjust the kube-apiserver deployment
    async fn ensure_kube_apiserver_deployment(&self, _deployment: &mut Deployment) -> Result<()> {
        Ok(())
    }

    /// Adjust the kube-controller-manager deployment
    async fn ensure_kube_controller_manager_deployment(
        &self,
        _deployment: &mut Deployment,
    ) -> Result<()> {
        Ok(())
    }

    /// Adjust the kube-scheduler deployment
    async fn ensure_kube_scheduler_deployment(&self, _deployment: &mut Deployment) -> Result<()> {
        Ok(())
    }

    /// Adjust an etcd stateful set, with the owning cluster context resolved
    async fn ensure_etcd_stateful_set(
        &self,
        _stateful_set: &mut StatefulSet,
        _cluster: &Cluster,
    ) -> Result<()> {
        Ok(())
    }

    /// Adjust the kubelet.service unit options
    async fn ensure_kubelet_service_unit_options(
        &self,
        options: Vec<UnitOption>,
    ) -> Result<Vec<UnitOption>> {
        Ok(options)
    }

    /// Adjust the kubelet configuration in place
    async fn ensure_kubelet_configuration(&self, _config: &mut KubeletConfiguration) -> Result<()> {
        Ok(())
    }

    /// Adjust the general kubernetes sysctl configuration in place
    async fn ensure_kubernetes_general_configuration(&self, _config: &mut String) -> Result<()> {
        Ok(())
    }

    /// Whether a cloud provider config file must be provisioned for the kubelet
    fn should_provision_kubelet_cloud_provider_config(&self) -> bool {
        false
    }

    /// Produce the kubelet cloud provider config content
    ///
    /// Called with an empty string and the control-plane namespace; the hook
    /// fills in the desired file content.
    async fn ensure_kubelet_cloud_provider_config(
        &self,
        _content: &mut String,
        _namespace: &str,
    ) -> Result<()> {
        Ok(())
    }
}
