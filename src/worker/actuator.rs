//! Worker teardown control loop
//!
//! One Delete call walks a fixed sequence: wake the machine controller,
//! grant it RBAC in the target cluster, escalate every machine to forced
//! deletion, cascade-delete the machine resources, wait bounded for the
//! external controller to drain the collections, then remove the controller
//! itself. Every stage error is wrapped with the stage name and surfaced;
//! the caller retries by re-invoking Delete, which is idempotent end to end.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use kube::discovery::ApiResource;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::chart::{machine_controller_manager_shoot_chart, Chart, ChartApplier};
use crate::cluster::Cluster;
use crate::crd::{Machine, Worker};
use crate::worker::wait::{poll_until, PollTick, Tick, WaitOutcome};
use crate::worker::{DelegateFactory, MachineStore, ShootClientFactory, WorkerDelegate};
use crate::{
    Error, Result, FORCE_DELETION_LABEL_KEY, FORCE_DELETION_LABEL_VALUE,
    MACHINE_CONTROLLER_MANAGER_NAME, SYSTEM_NAMESPACE,
};

/// Tunables of the teardown loop
#[derive(Clone, Debug)]
pub struct ActuatorConfig {
    /// Name of the machine-controller-manager deployment in the seed
    pub machine_controller_manager_name: String,
    /// Cadence of the convergence wait
    pub poll_interval: Duration,
    /// Hard deadline for the convergence wait
    pub deletion_timeout: Duration,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            machine_controller_manager_name: MACHINE_CONTROLLER_MANAGER_NAME.to_string(),
            poll_interval: Duration::from_secs(5),
            deletion_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Generic worker actuator
///
/// Holds only capability objects; provider specifics enter exclusively
/// through the delegate produced per request. Wiring happens once at
/// construction.
pub struct WorkerActuator {
    config: ActuatorConfig,
    delegate_factory: Arc<dyn DelegateFactory>,
    store: Arc<dyn MachineStore>,
    seed_charts: Arc<dyn ChartApplier>,
    shoot_clients: Arc<dyn ShootClientFactory>,
    mcm_seed_chart: Chart,
    mcm_shoot_chart: Chart,
}

impl WorkerActuator {
    /// Create a new actuator
    ///
    /// `mcm_seed_chart` is the provider's chart that installed the
    /// machine-controller-manager in the seed; the shoot-side RBAC chart
    /// defaults to the generic one and can be overridden.
    pub fn new(
        delegate_factory: Arc<dyn DelegateFactory>,
        store: Arc<dyn MachineStore>,
        seed_charts: Arc<dyn ChartApplier>,
        shoot_clients: Arc<dyn ShootClientFactory>,
        mcm_seed_chart: Chart,
    ) -> Self {
        Self {
            config: ActuatorConfig::default(),
            delegate_factory,
            store,
            seed_charts,
            shoot_clients,
            mcm_seed_chart,
            mcm_shoot_chart: machine_controller_manager_shoot_chart(),
        }
    }

    /// Override the default configuration
    pub fn with_config(mut self, config: ActuatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the shoot-side controller chart
    pub fn with_shoot_chart(mut self, chart: Chart) -> Self {
        self.mcm_shoot_chart = chart;
        self
    }

    /// Tear down the worker's machines and supporting resources
    ///
    /// Strictly sequential apart from the per-machine labelling fan-out.
    /// Safe to call repeatedly: every step is an idempotent signal or a
    /// delete that tolerates already-gone state. `cancel` propagates into
    /// the convergence wait and makes it return promptly.
    pub async fn delete(
        &self,
        worker: &Worker,
        cluster: &Cluster,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let namespace = worker
            .namespace()
            .ok_or_else(|| Error::internal("worker has no namespace"))?;
        let worker_ref = format!("{}/{}", namespace, worker.name_any());

        let delegate = self
            .delegate_factory
            .worker_delegate(worker, cluster)
            .await
            .map_err(|e| Error::stage("could not instantiate worker delegate", e))?;

        // Make sure the machine-controller-manager is awake before deleting
        // the machines; the whole teardown depends on it observing state.
        let deployment = self
            .store
            .get_deployment(&namespace, &self.config.machine_controller_manager_name)
            .await?;
        let replicas = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
        if replicas < 1 {
            info!(worker = %worker_ref, "Scaling up the machine-controller-manager");
            self.store
                .scale_deployment(&namespace, &self.config.machine_controller_manager_name, 1)
                .await?;
        }

        // Grant the controller its RBAC in the target cluster. Stopgap until
        // a resource manager owns these roles; the apply is idempotent.
        self.apply_shoot_charts(delegate.as_ref(), &namespace)
            .await
            .map_err(|e| {
                Error::stage("could not apply machine-controller-manager shoot chart", e)
            })?;

        info!(worker = %worker_ref, "Deleting all machines");
        self.mark_all_machines_for_forceful_deletion(&namespace)
            .await
            .map_err(|e| Error::stage("marking all machines for forceful deletion failed", e))?;

        self.store
            .delete_machine_deployments(&namespace)
            .await
            .map_err(|e| Error::stage("cleaning up machine deployments failed", e))?;

        let machine_class_resource = delegate.machine_class_resource();
        self.store
            .delete_machine_classes(&namespace, &machine_class_resource)
            .await
            .map_err(|e| Error::stage("cleaning up machine classes failed", e))?;

        self.store
            .delete_machine_class_secrets(&namespace)
            .await
            .map_err(|e| Error::stage("cleaning up machine class secrets failed", e))?;

        // Wait until the external controller has drained every collection.
        let mut tick = MachineResourceTick::new(
            self.store.as_ref(),
            &namespace,
            machine_class_resource,
            &worker_ref,
        );
        match poll_until(
            self.config.poll_interval,
            self.config.deletion_timeout,
            cancel,
            &mut tick,
        )
        .await
        {
            WaitOutcome::Converged => {}
            WaitOutcome::Fatal(e) => {
                return Err(Error::stage(
                    "failed while waiting for all machine resources to be deleted",
                    e,
                ))
            }
            WaitOutcome::TimedOut => {
                return Err(Error::timeout("waiting for machine resources to be deleted"))
            }
            WaitOutcome::Cancelled => {
                return Err(Error::cancelled("waiting for machine resources to be deleted"))
            }
        }

        info!(worker = %worker_ref, "Deleting the machine-controller-manager");
        let shoot_applier = self.shoot_clients.chart_applier(&namespace).await.map_err(|e| {
            Error::stage(
                "could not create shoot client for cleanup of machine-controller-manager resources",
                e,
            )
        })?;
        shoot_applier
            .delete(&self.mcm_shoot_chart, SYSTEM_NAMESPACE)
            .await
            .map_err(|e| {
                Error::stage("cleaning up machine-controller-manager resources in shoot failed", e)
            })?;
        self.seed_charts
            .delete(&self.mcm_seed_chart, &namespace)
            .await
            .map_err(|e| {
                Error::stage("cleaning up machine-controller-manager resources in seed failed", e)
            })?;

        Ok(())
    }

    async fn apply_shoot_charts(
        &self,
        delegate: &dyn WorkerDelegate,
        namespace: &str,
    ) -> Result<()> {
        let applier = self.shoot_clients.chart_applier(namespace).await?;
        applier.apply(&self.mcm_shoot_chart, SYSTEM_NAMESPACE).await?;
        if let Some(chart) = delegate.bootstrap_chart() {
            applier.apply(&chart, SYSTEM_NAMESPACE).await?;
        }
        Ok(())
    }

    /// Label every machine in the namespace for forceful deletion
    ///
    /// One concurrent task per machine, no ordering between them. Failures
    /// are funneled through the task results and aggregated; on any failure
    /// the aggregate aborts the teardown so cascade deletion never runs on
    /// partially-labelled state. Successful labels are kept.
    async fn mark_all_machines_for_forceful_deletion(&self, namespace: &str) -> Result<()> {
        let machines = self.store.list_machines(namespace).await?;

        let tasks = machines.into_iter().map(|machine| async move {
            let name = machine.name_any();
            self.mark_machine_for_forceful_deletion(machine)
                .await
                .map_err(|e| Error::stage(format!("machine {name}"), e))
        });

        let errors: Vec<Error> = join_all(tasks)
            .await
            .into_iter()
            .filter_map(std::result::Result::err)
            .collect();

        if !errors.is_empty() {
            return Err(Error::aggregate(
                "labelling machines for forceful deletion",
                errors,
            ));
        }
        Ok(())
    }

    /// Label one machine for forceful deletion
    ///
    /// Check-then-set: a machine already carrying the marker issues no
    /// update call, which keeps re-invocation cheap and conflict-free.
    async fn mark_machine_for_forceful_deletion(&self, mut machine: Machine) -> Result<()> {
        let labels = machine.metadata.labels.get_or_insert_with(BTreeMap::new);
        if labels.get(FORCE_DELETION_LABEL_KEY).map(String::as_str)
            == Some(FORCE_DELETION_LABEL_VALUE)
        {
            return Ok(());
        }

        labels.insert(
            FORCE_DELETION_LABEL_KEY.to_string(),
            FORCE_DELETION_LABEL_VALUE.to_string(),
        );
        self.store.update_machine(&machine).await
    }
}

/// Convergence check over the five machine resource collections
///
/// Counts are monotonic: once a collection reaches zero it is never queried
/// again - the external controller is trusted not to recreate resources
/// during teardown.
struct MachineResourceTick<'a> {
    store: &'a dyn MachineStore,
    namespace: &'a str,
    machine_class_resource: ApiResource,
    worker: &'a str,
    machines: Option<usize>,
    machine_sets: Option<usize>,
    machine_deployments: Option<usize>,
    machine_classes: Option<usize>,
    machine_class_secrets: Option<usize>,
}

impl<'a> MachineResourceTick<'a> {
    fn new(
        store: &'a dyn MachineStore,
        namespace: &'a str,
        machine_class_resource: ApiResource,
        worker: &'a str,
    ) -> Self {
        Self {
            store,
            namespace,
            machine_class_resource,
            worker,
            machines: None,
            machine_sets: None,
            machine_deployments: None,
            machine_classes: None,
            machine_class_secrets: None,
        }
    }

    fn pending_summary(&self) -> String {
        let counts = [
            (self.machines, "machine"),
            (self.machine_sets, "machine set"),
            (self.machine_deployments, "machine deployment"),
            (self.machine_classes, "machine class"),
            (self.machine_class_secrets, "machine class secret"),
        ];
        counts
            .iter()
            .filter_map(|(count, label)| match count {
                Some(n) if *n > 0 => Some(format!(
                    "{n} {label}{}",
                    if *n == 1 { "" } else { "s" }
                )),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[async_trait::async_trait]
impl PollTick for MachineResourceTick<'_> {
    async fn tick(&mut self) -> Result<Tick> {
        if self.machines != Some(0) {
            self.machines = Some(self.store.list_machines(self.namespace).await?.len());
        }

        if self.machine_sets != Some(0) {
            self.machine_sets = Some(self.store.list_machine_sets(self.namespace).await?.len());
        }

        if self.machine_deployments != Some(0) {
            let deployments = self.store.list_machine_deployments(self.namespace).await?;

            // A machine the controller gave up on is fatal; never keep
            // polling over it.
            for deployment in &deployments {
                if let Some(failed) = deployment
                    .status
                    .as_ref()
                    .and_then(|s| s.failed_machines.first())
                {
                    return Err(Error::machine_failed(
                        &failed.name,
                        &failed.last_operation.description,
                    ));
                }
            }
            self.machine_deployments = Some(deployments.len());
        }

        if self.machine_classes != Some(0) {
            self.machine_classes = Some(
                self.store
                    .list_machine_classes(self.namespace, &self.machine_class_resource)
                    .await?
                    .len(),
            );
        }

        if self.machine_class_secrets != Some(0) {
            // Secrets without finalizers are already inert.
            let secrets = self.store.list_machine_class_secrets(self.namespace).await?;
            self.machine_class_secrets = Some(
                secrets
                    .iter()
                    .filter(|s| s.metadata.finalizers.as_ref().is_some_and(|f| !f.is_empty()))
                    .count(),
            );
        }

        let all_zero = [
            self.machines,
            self.machine_sets,
            self.machine_deployments,
            self.machine_classes,
            self.machine_class_secrets,
        ]
        .iter()
        .all(|c| *c == Some(0));

        if all_zero {
            return Ok(Tick::Done);
        }

        info!(
            worker = %self.worker,
            "Waiting until the following machine resources have been processed: {}",
            self.pending_summary()
        );
        Ok(Tick::Pending)
    }
}
