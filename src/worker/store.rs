//! Store seam for the teardown loop
//!
//! All remote state the loop reads or writes goes through [`MachineStore`],
//! so the control flow is testable without an API server and providers never
//! see raw clients. The kube-backed implementation is plain CRUD; machine
//! classes are provider-typed and therefore handled untyped through the
//! delegate's `ApiResource`.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config, ResourceExt};

#[cfg(test)]
use mockall::automock;

use crate::chart::{ChartApplier, KubeChartApplier, FIELD_MANAGER};
use crate::crd::{Machine, MachineDeployment, MachineSet};
use crate::{Error, Result, MACHINE_CLASS_SECRET_SELECTOR, SHOOT_KUBECONFIG_SECRET_NAME};

/// Remote store operations the teardown loop consumes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MachineStore: Send + Sync {
    /// Get a deployment by namespace and name
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment>;

    /// Scale a deployment to the given replica count
    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()>;

    /// List all machines in the namespace
    async fn list_machines(&self, namespace: &str) -> Result<Vec<Machine>>;

    /// Write back a modified machine
    async fn update_machine(&self, machine: &Machine) -> Result<()>;

    /// List all machine sets in the namespace
    async fn list_machine_sets(&self, namespace: &str) -> Result<Vec<MachineSet>>;

    /// List all machine deployments in the namespace
    async fn list_machine_deployments(&self, namespace: &str) -> Result<Vec<MachineDeployment>>;

    /// Delete all machine deployments in the namespace
    async fn delete_machine_deployments(&self, namespace: &str) -> Result<()>;

    /// List the provider's machine classes in the namespace
    async fn list_machine_classes(
        &self,
        namespace: &str,
        resource: &ApiResource,
    ) -> Result<Vec<DynamicObject>>;

    /// Delete all of the provider's machine classes in the namespace
    async fn delete_machine_classes(&self, namespace: &str, resource: &ApiResource) -> Result<()>;

    /// List machine class secrets in the namespace
    async fn list_machine_class_secrets(&self, namespace: &str) -> Result<Vec<Secret>>;

    /// Delete all machine class secrets in the namespace
    async fn delete_machine_class_secrets(&self, namespace: &str) -> Result<()>;
}

/// Machine store backed by the Kubernetes API of the managing cluster
pub struct KubeMachineStore {
    client: Client,
    secret_selector: String,
}

impl KubeMachineStore {
    /// Create a new store using the given client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            secret_selector: MACHINE_CLASS_SECRET_SELECTOR.to_string(),
        }
    }

    /// Override the label selector scoping machine class secrets
    pub fn with_secret_selector(mut self, selector: impl Into<String>) -> Self {
        self.secret_selector = selector.into();
        self
    }

    fn machine_class_api(&self, namespace: &str, resource: &ApiResource) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }
}

#[async_trait]
impl MachineStore for KubeMachineStore {
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn list_machines(&self, namespace: &str) -> Result<Vec<Machine>> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn update_machine(&self, machine: &Machine) -> Result<()> {
        let namespace = machine
            .namespace()
            .ok_or_else(|| Error::internal("machine has no namespace"))?;
        let api: Api<Machine> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&machine.name_any(), &PostParams::default(), machine)
            .await?;
        Ok(())
    }

    async fn list_machine_sets(&self, namespace: &str) -> Result<Vec<MachineSet>> {
        let api: Api<MachineSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_machine_deployments(&self, namespace: &str) -> Result<Vec<MachineDeployment>> {
        let api: Api<MachineDeployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn delete_machine_deployments(&self, namespace: &str) -> Result<()> {
        let api: Api<MachineDeployment> = Api::namespaced(self.client.clone(), namespace);
        api.delete_collection(&DeleteParams::default(), &ListParams::default())
            .await?;
        Ok(())
    }

    async fn list_machine_classes(
        &self,
        namespace: &str,
        resource: &ApiResource,
    ) -> Result<Vec<DynamicObject>> {
        let api = self.machine_class_api(namespace, resource);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn delete_machine_classes(&self, namespace: &str, resource: &ApiResource) -> Result<()> {
        let api = self.machine_class_api(namespace, resource);
        api.delete_collection(&DeleteParams::default(), &ListParams::default())
            .await?;
        Ok(())
    }

    async fn list_machine_class_secrets(&self, namespace: &str) -> Result<Vec<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&self.secret_selector);
        Ok(api.list(&params).await?.items)
    }

    async fn delete_machine_class_secrets(&self, namespace: &str) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&self.secret_selector);
        api.delete_collection(&DeleteParams::default(), &params)
            .await?;
        Ok(())
    }
}

/// Capability to reach the target (shoot) cluster of a control-plane namespace
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ShootClientFactory: Send + Sync {
    /// Build a chart applier talking to the namespace's target cluster
    async fn chart_applier(&self, namespace: &str) -> Result<Box<dyn ChartApplier>>;
}

/// Shoot client factory reading the kubeconfig secret of the namespace
///
/// The control-plane namespace carries a secret with the target cluster's
/// kubeconfig; a fresh client is built from it per request and not cached,
/// since credentials rotate.
pub struct KubeShootClientFactory {
    client: Client,
}

impl KubeShootClientFactory {
    /// Create a new factory using the given managing-cluster client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ShootClientFactory for KubeShootClientFactory {
    async fn chart_applier(&self, namespace: &str) -> Result<Box<dyn ChartApplier>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get(SHOOT_KUBECONFIG_SECRET_NAME).await?;

        let data = secret
            .data
            .as_ref()
            .and_then(|d| d.get("kubeconfig"))
            .ok_or_else(|| {
                Error::setup(format!(
                    "secret {namespace}/{SHOOT_KUBECONFIG_SECRET_NAME} has no kubeconfig key"
                ))
            })?;

        let yaml = std::str::from_utf8(&data.0)
            .map_err(|e| Error::setup(format!("kubeconfig is not valid UTF-8: {e}")))?;
        let kubeconfig = Kubeconfig::from_yaml(yaml)
            .map_err(|e| Error::setup(format!("could not parse shoot kubeconfig: {e}")))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::setup(format!("could not load shoot kubeconfig: {e}")))?;
        let client = Client::try_from(config)
            .map_err(|e| Error::setup(format!("could not create shoot client: {e}")))?;

        Ok(Box::new(KubeChartApplier::new(client)))
    }
}
