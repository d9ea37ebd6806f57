//! Mutation dispatcher for well-known control-plane objects
//!
//! The dispatcher routes an incoming object by concrete kind and well-known
//! name to the matching [`Ensurer`] hook, owning the decode/mutate/encode
//! round trips for the payloads embedded in an OperatingSystemConfig.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Service;
use kube::api::DynamicObject;
use tracing::debug;

use crate::cluster::ClusterLookup;
use crate::codec::{FileContentInlineCodec, KubeletConfigCodec, UnitSerializer, B64_ENCODING};
use crate::crd::{
    ensure_file_with_path, file_with_path, unit_with_name, File, FileContent, FileContentInline,
    OperatingSystemConfig, OperatingSystemConfigPurpose,
};
use crate::mutate::Ensurer;
use crate::{
    Error, Result, CLOUD_PROVIDER_CONFIG_PATH, CLOUD_PROVIDER_CONFIG_PERMISSIONS,
    ETCD_EVENTS_NAME, ETCD_MAIN_NAME, GENERAL_CONFIG_PATH, KUBELET_CONFIG_PATH, KUBELET_UNIT_NAME,
    KUBE_APISERVER_NAME, KUBE_CONTROLLER_MANAGER_NAME, KUBE_SCHEDULER_NAME,
};

/// One object of the closed set of kinds the dispatcher understands
///
/// The admission host decodes the raw request into this enum; kinds outside
/// the set never reach the dispatcher.
#[derive(Clone, Debug)]
pub enum TargetObject {
    /// A core/v1 Service
    Service(Service),
    /// An apps/v1 Deployment
    Deployment(Deployment),
    /// An apps/v1 StatefulSet
    StatefulSet(StatefulSet),
    /// An extension OperatingSystemConfig
    OperatingSystemConfig(OperatingSystemConfig),
}

impl TargetObject {
    /// Convert an untyped admission object into a target, if its kind is known
    ///
    /// Returns `Ok(None)` for kinds outside the closed set so the host can
    /// pass them through untouched.
    pub fn from_dynamic(obj: &DynamicObject) -> Result<Option<Self>> {
        let kind = obj
            .types
            .as_ref()
            .map(|t| t.kind.as_str())
            .unwrap_or_default();
        let value = serde_json::to_value(obj).map_err(Error::serialization)?;

        let target = match kind {
            "Service" => Some(Self::Service(
                serde_json::from_value(value).map_err(Error::serialization)?,
            )),
            "Deployment" => Some(Self::Deployment(
                serde_json::from_value(value).map_err(Error::serialization)?,
            )),
            "StatefulSet" => Some(Self::StatefulSet(
                serde_json::from_value(value).map_err(Error::serialization)?,
            )),
            "OperatingSystemConfig" => Some(Self::OperatingSystemConfig(
                serde_json::from_value(value).map_err(Error::serialization)?,
            )),
            _ => None,
        };
        Ok(target)
    }

    /// Kind of the wrapped object
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Service(_) => "Service",
            Self::Deployment(_) => "Deployment",
            Self::StatefulSet(_) => "StatefulSet",
            Self::OperatingSystemConfig(_) => "OperatingSystemConfig",
        }
    }

    /// Name of the wrapped object, if set
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Service(o) => o.metadata.name.as_deref(),
            Self::Deployment(o) => o.metadata.name.as_deref(),
            Self::StatefulSet(o) => o.metadata.name.as_deref(),
            Self::OperatingSystemConfig(o) => o.metadata.name.as_deref(),
        }
    }

    /// Serialize the (possibly mutated) object back to JSON for the host
    pub fn into_json(self) -> Result<serde_json::Value> {
        let value = match self {
            Self::Service(o) => serde_json::to_value(o),
            Self::Deployment(o) => serde_json::to_value(o),
            Self::StatefulSet(o) => serde_json::to_value(o),
            Self::OperatingSystemConfig(o) => serde_json::to_value(o),
        };
        value.map_err(Error::serialization)
    }
}

/// Mutation dispatcher
///
/// Holds the provider's [`Ensurer`] and the codec collaborators; wired once
/// per request context by the host, never mutated afterwards.
pub struct Mutator {
    ensurer: Arc<dyn Ensurer>,
    cluster_lookup: Arc<dyn ClusterLookup>,
    unit_serializer: UnitSerializer,
    kubelet_codec: KubeletConfigCodec,
    fci_codec: FileContentInlineCodec,
}

impl Mutator {
    /// Create a new dispatcher for the given ensurer and cluster lookup
    pub fn new(ensurer: Arc<dyn Ensurer>, cluster_lookup: Arc<dyn ClusterLookup>) -> Self {
        Self {
            ensurer,
            cluster_lookup,
            unit_serializer: UnitSerializer,
            kubelet_codec: KubeletConfigCodec::default(),
            fci_codec: FileContentInlineCodec,
        }
    }

    /// Mutate the given object in place if it is one the provider owns
    ///
    /// Objects whose (kind, name) pair is not well-known are left untouched
    /// and the call succeeds: the framework tolerates being handed objects it
    /// does not own, including objects in transition. Integrators may rely on
    /// that for the existing kinds; the set is deliberately not extended.
    pub async fn mutate(&self, target: &mut TargetObject) -> Result<()> {
        match target {
            TargetObject::Service(service) => match service.metadata.name.as_deref() {
                Some(KUBE_APISERVER_NAME) => {
                    self.ensurer.ensure_kube_apiserver_service(service).await
                }
                other => self.skip("Service", other),
            },
            TargetObject::Deployment(deployment) => match deployment.metadata.name.as_deref() {
                Some(KUBE_APISERVER_NAME) => {
                    self.ensurer.ensure_kube_apiserver_deployment(deployment).await
                }
                Some(KUBE_CONTROLLER_MANAGER_NAME) => {
                    self.ensurer
                        .ensure_kube_controller_manager_deployment(deployment)
                        .await
                }
                Some(KUBE_SCHEDULER_NAME) => {
                    self.ensurer.ensure_kube_scheduler_deployment(deployment).await
                }
                other => self.skip("Deployment", other),
            },
            TargetObject::StatefulSet(stateful_set) => {
                match stateful_set.metadata.name.as_deref() {
                    Some(ETCD_MAIN_NAME) | Some(ETCD_EVENTS_NAME) => {
                        // Cluster context is required before any provider call.
                        let namespace = stateful_set
                            .metadata
                            .namespace
                            .clone()
                            .ok_or_else(|| Error::internal("stateful set has no namespace"))?;
                        let cluster = self
                            .cluster_lookup
                            .cluster_for_namespace(&namespace)
                            .await
                            .map_err(|e| {
                                Error::stage(
                                    format!("could not get cluster for namespace {namespace:?}"),
                                    e,
                                )
                            })?;
                        self.ensurer
                            .ensure_etcd_stateful_set(stateful_set, &cluster)
                            .await
                    }
                    other => self.skip("StatefulSet", other),
                }
            }
            TargetObject::OperatingSystemConfig(osc) => {
                if osc.spec.purpose == OperatingSystemConfigPurpose::Reconcile {
                    self.mutate_operating_system_config(osc).await
                } else {
                    let name = osc.metadata.name.as_deref();
                    self.skip("OperatingSystemConfig", name)
                }
            }
        }
    }

    fn skip(&self, kind: &str, name: Option<&str>) -> Result<()> {
        debug!(
            kind,
            name = name.unwrap_or(""),
            "Object not owned by this provider, leaving it untouched"
        );
        Ok(())
    }

    /// Run the four order-significant payload mutations
    ///
    /// Each step is a no-op when its payload is absent. A failing step aborts
    /// the dispatch; steps already completed keep their in-place mutations.
    async fn mutate_operating_system_config(&self, osc: &mut OperatingSystemConfig) -> Result<()> {
        let namespace = osc.metadata.namespace.clone().unwrap_or_default();

        if let Some(unit) = unit_with_name(&mut osc.spec.units, KUBELET_UNIT_NAME) {
            if let Some(content) = unit.content.as_mut() {
                self.ensure_kubelet_service_unit_content(content).await?;
            }
        }

        if let Some(file) = file_with_path(&mut osc.spec.files, KUBELET_CONFIG_PATH) {
            if let Some(inline) = file.content.inline.as_mut() {
                self.ensure_kubelet_config_file_content(inline).await?;
            }
        }

        if let Some(file) = file_with_path(&mut osc.spec.files, GENERAL_CONFIG_PATH) {
            if let Some(inline) = file.content.inline.as_mut() {
                self.ensure_kubernetes_general_configuration(inline).await?;
            }
        }

        if self.ensurer.should_provision_kubelet_cloud_provider_config() {
            self.ensure_kubelet_cloud_provider_config(osc, &namespace).await?;
        }

        Ok(())
    }

    async fn ensure_kubelet_service_unit_content(&self, content: &mut String) -> Result<()> {
        let options = self
            .unit_serializer
            .deserialize(content)
            .map_err(|e| Error::stage("mutating kubelet.service unit content", e))?;

        let options = self.ensurer.ensure_kubelet_service_unit_options(options).await?;

        *content = self
            .unit_serializer
            .serialize(&options)
            .map_err(|e| Error::stage("mutating kubelet.service unit content", e))?;

        Ok(())
    }

    async fn ensure_kubelet_config_file_content(&self, fci: &mut FileContentInline) -> Result<()> {
        let mut config = self
            .kubelet_codec
            .decode(fci)
            .map_err(|e| Error::stage("mutating kubelet configuration", e))?;

        self.ensurer.ensure_kubelet_configuration(&mut config).await?;

        *fci = self
            .kubelet_codec
            .encode(&config, &fci.encoding)
            .map_err(|e| Error::stage("mutating kubelet configuration", e))?;

        Ok(())
    }

    async fn ensure_kubernetes_general_configuration(
        &self,
        fci: &mut FileContentInline,
    ) -> Result<()> {
        let data = self
            .fci_codec
            .decode(fci)
            .map_err(|e| Error::stage("mutating kubernetes general configuration", e))?;

        let mut text = String::from_utf8(data)
            .map_err(|e| Error::decode("kubernetes general configuration", e))?;
        self.ensurer
            .ensure_kubernetes_general_configuration(&mut text)
            .await?;

        *fci = self
            .fci_codec
            .encode(text.as_bytes(), &fci.encoding)
            .map_err(|e| Error::stage("mutating kubernetes general configuration", e))?;

        Ok(())
    }

    async fn ensure_kubelet_cloud_provider_config(
        &self,
        osc: &mut OperatingSystemConfig,
        namespace: &str,
    ) -> Result<()> {
        let mut content = String::new();
        self.ensurer
            .ensure_kubelet_cloud_provider_config(&mut content, namespace)
            .await?;

        let inline = self
            .fci_codec
            .encode(content.as_bytes(), B64_ENCODING)
            .map_err(|e| Error::stage("mutating kubelet cloud provider config", e))?;

        ensure_file_with_path(
            &mut osc.spec.files,
            File {
                path: CLOUD_PROVIDER_CONFIG_PATH.to_string(),
                permissions: Some(CLOUD_PROVIDER_CONFIG_PERMISSIONS),
                content: FileContent {
                    inline: Some(inline),
                },
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Cluster, ClusterSpec, MockClusterLookup};
    use crate::codec::UnitOption;
    use crate::crd::{OperatingSystemConfigSpec, Unit};
    use crate::mutate::MockEnsurer;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    /// Provider that implements no hooks; every default is a no-op.
    struct NoopEnsurer;
    impl Ensurer for NoopEnsurer {}

    fn service(name: &str) -> TargetObject {
        TargetObject::Service(Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("shoot--foo--bar".to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn deployment(name: &str) -> TargetObject {
        TargetObject::Deployment(Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("shoot--foo--bar".to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn stateful_set(name: &str) -> TargetObject {
        TargetObject::StatefulSet(StatefulSet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("shoot--foo--bar".to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    const KUBELET_UNIT: &str = "\
[Service]
Restart=always
ExecStart=/opt/bin/kubelet --config=/var/lib/kubelet/config/kubelet
";

    fn reconcile_osc() -> OperatingSystemConfig {
        let fci = FileContentInlineCodec;
        let kubelet_yaml = "apiVersion: kubelet.config.k8s.io/v1beta1\nkind: KubeletConfiguration\nmaxPods: 110\n";

        let mut osc = OperatingSystemConfig::new(
            "osc-worker",
            OperatingSystemConfigSpec {
                purpose: OperatingSystemConfigPurpose::Reconcile,
                units: vec![Unit {
                    name: KUBELET_UNIT_NAME.to_string(),
                    content: Some(KUBELET_UNIT.to_string()),
                    ..Default::default()
                }],
                files: vec![
                    File {
                        path: KUBELET_CONFIG_PATH.to_string(),
                        permissions: Some(0o644),
                        content: FileContent {
                            inline: Some(fci.encode(kubelet_yaml.as_bytes(), B64_ENCODING).unwrap()),
                        },
                    },
                    File {
                        path: GENERAL_CONFIG_PATH.to_string(),
                        permissions: Some(0o644),
                        content: FileContent {
                            inline: Some(FileContentInline {
                                encoding: String::new(),
                                data: "net.ipv4.ip_forward = 1\n".to_string(),
                            }),
                        },
                    },
                ],
            },
        );
        osc.metadata.namespace = Some("shoot--foo--bar".to_string());
        osc
    }

    fn mutator(ensurer: impl Ensurer + 'static) -> Mutator {
        Mutator::new(Arc::new(ensurer), Arc::new(MockClusterLookup::new()))
    }

    #[tokio::test]
    async fn unmatched_kind_name_pairs_are_a_silent_noop() {
        // A mock with no expectations panics if any hook is reached.
        let m = mutator(MockEnsurer::new());

        for mut target in [
            service("some-other-service"),
            deployment("coredns"),
            stateful_set("prometheus"),
        ] {
            m.mutate(&mut target).await.expect("unmatched object must be a no-op");
        }
    }

    #[tokio::test]
    async fn workload_objects_dispatch_by_well_known_name() {
        let mut ensurer = MockEnsurer::new();
        ensurer
            .expect_ensure_kube_apiserver_service()
            .times(1)
            .returning(|_| Ok(()));
        ensurer
            .expect_ensure_kube_apiserver_deployment()
            .times(1)
            .returning(|_| Ok(()));
        ensurer
            .expect_ensure_kube_controller_manager_deployment()
            .times(1)
            .returning(|_| Ok(()));
        ensurer
            .expect_ensure_kube_scheduler_deployment()
            .times(1)
            .returning(|_| Ok(()));

        let m = mutator(ensurer);
        for mut target in [
            service(KUBE_APISERVER_NAME),
            deployment(KUBE_APISERVER_NAME),
            deployment(KUBE_CONTROLLER_MANAGER_NAME),
            deployment(KUBE_SCHEDULER_NAME),
        ] {
            m.mutate(&mut target).await.unwrap();
        }
    }

    #[tokio::test]
    async fn etcd_stateful_set_resolves_cluster_first() {
        let mut ensurer = MockEnsurer::new();
        ensurer
            .expect_ensure_etcd_stateful_set()
            .times(2)
            .returning(|_, _| Ok(()));

        let mut lookup = MockClusterLookup::new();
        lookup
            .expect_cluster_for_namespace()
            .times(2)
            .returning(|ns| Ok(Cluster::new(ns, ClusterSpec::default())));

        let m = Mutator::new(Arc::new(ensurer), Arc::new(lookup));
        for mut target in [stateful_set(ETCD_MAIN_NAME), stateful_set(ETCD_EVENTS_NAME)] {
            m.mutate(&mut target).await.unwrap();
        }
    }

    #[tokio::test]
    async fn etcd_mutation_fails_loudly_when_cluster_lookup_fails() {
        let mut lookup = MockClusterLookup::new();
        lookup
            .expect_cluster_for_namespace()
            .returning(|_| Err(Error::internal("cluster object missing")));

        let m = Mutator::new(Arc::new(MockEnsurer::new()), Arc::new(lookup));
        let err = m
            .mutate(&mut stateful_set(ETCD_MAIN_NAME))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("could not get cluster for namespace"));
        assert!(err.to_string().contains("shoot--foo--bar"));
    }

    #[tokio::test]
    async fn provision_purpose_is_ignored() {
        let mut osc = reconcile_osc();
        osc.spec.purpose = OperatingSystemConfigPurpose::Provision;
        let before = osc.clone();

        let m = mutator(MockEnsurer::new());
        let mut target = TargetObject::OperatingSystemConfig(osc);
        m.mutate(&mut target).await.unwrap();

        match target {
            TargetObject::OperatingSystemConfig(after) => assert_eq!(after, before),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn untouched_payloads_roundtrip_unchanged() {
        let osc = reconcile_osc();
        let before = osc.clone();

        let m = mutator(NoopEnsurer);
        let mut target = TargetObject::OperatingSystemConfig(osc);
        m.mutate(&mut target).await.unwrap();

        match target {
            TargetObject::OperatingSystemConfig(after) => {
                assert_eq!(
                    after.spec.units[0].content, before.spec.units[0].content,
                    "unit content must round-trip byte-for-byte"
                );
                assert_eq!(after.spec.files[1], before.spec.files[1]);
                // The kubelet config re-encodes through the typed codec; the
                // declared encoding must survive even then.
                assert_eq!(
                    after.spec.files[0].content.inline.as_ref().unwrap().encoding,
                    "b64"
                );
            }
            _ => unreachable!(),
        }
    }

    fn mutating_ensurer(times: usize) -> MockEnsurer {
        let mut ensurer = MockEnsurer::new();
        ensurer
            .expect_ensure_kubelet_service_unit_options()
            .times(times)
            .returning(|mut options| {
                if !options
                    .iter()
                    .any(|o| o.section == "Service" && o.name == "Environment")
                {
                    options.push(UnitOption::new(
                        "Service",
                        "Environment",
                        "KUBELET_EXTRA_ARGS=--cloud-provider=external",
                    ));
                }
                Ok(options)
            });
        ensurer
            .expect_ensure_kubelet_configuration()
            .times(times)
            .returning(|config| {
                config.max_pods = Some(250);
                Ok(())
            });
        ensurer
            .expect_ensure_kubernetes_general_configuration()
            .times(times)
            .returning(|text| {
                if !text.contains("vm.max_map_count") {
                    text.push_str("vm.max_map_count = 262144\n");
                }
                Ok(())
            });
        ensurer
            .expect_should_provision_kubelet_cloud_provider_config()
            .times(times)
            .returning(|| true);
        ensurer
            .expect_ensure_kubelet_cloud_provider_config()
            .times(times)
            .returning(|content, namespace| {
                assert_eq!(namespace, "shoot--foo--bar");
                assert!(content.is_empty(), "hook receives an empty string");
                content.push_str("CONFIG");
                Ok(())
            });
        ensurer
    }

    fn assert_fully_mutated(osc: &OperatingSystemConfig) {
        let fci = FileContentInlineCodec;

        let unit_content = osc.spec.units[0].content.as_deref().unwrap();
        assert!(unit_content.contains("Environment=KUBELET_EXTRA_ARGS=--cloud-provider=external"));

        let kubelet_inline = osc.spec.files[0].content.inline.as_ref().unwrap();
        assert_eq!(kubelet_inline.encoding, "b64", "declared encoding preserved");
        let kubelet_yaml = String::from_utf8(fci.decode(kubelet_inline).unwrap()).unwrap();
        assert!(kubelet_yaml.contains("maxPods: 250"));

        let sysctl_inline = osc.spec.files[1].content.inline.as_ref().unwrap();
        assert_eq!(sysctl_inline.encoding, "");
        assert!(sysctl_inline.data.contains("net.ipv4.ip_forward = 1"));
        assert!(sysctl_inline.data.contains("vm.max_map_count = 262144"));

        // Exactly one cloud provider config entry, at the fixed path.
        let cloud: Vec<&File> = osc
            .spec
            .files
            .iter()
            .filter(|f| f.path == CLOUD_PROVIDER_CONFIG_PATH)
            .collect();
        assert_eq!(cloud.len(), 1);
        assert_eq!(cloud[0].permissions, Some(0o644));
        let inline = cloud[0].content.inline.as_ref().unwrap();
        assert_eq!(inline.encoding, "b64");
        assert_eq!(fci.decode(inline).unwrap(), b"CONFIG");
    }

    #[tokio::test]
    async fn reconcile_osc_runs_all_four_steps() {
        let m = mutator(mutating_ensurer(1));
        let mut target = TargetObject::OperatingSystemConfig(reconcile_osc());
        m.mutate(&mut target).await.unwrap();

        match &target {
            TargetObject::OperatingSystemConfig(osc) => assert_fully_mutated(osc),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn mutation_is_idempotent_with_idempotent_hooks() {
        let m = mutator(mutating_ensurer(2));
        let mut target = TargetObject::OperatingSystemConfig(reconcile_osc());

        m.mutate(&mut target).await.unwrap();
        let once = match &target {
            TargetObject::OperatingSystemConfig(osc) => osc.clone(),
            _ => unreachable!(),
        };

        m.mutate(&mut target).await.unwrap();
        match &target {
            TargetObject::OperatingSystemConfig(osc) => {
                assert_eq!(osc, &once, "second mutation must change nothing");
                assert_fully_mutated(osc);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn absent_payloads_are_skipped() {
        let mut osc = reconcile_osc();
        osc.spec.units.clear();
        osc.spec.files.clear();

        // Only the cloud provider hooks may run; the payload hooks must not.
        let mut ensurer = MockEnsurer::new();
        ensurer
            .expect_should_provision_kubelet_cloud_provider_config()
            .returning(|| false);

        let m = mutator(ensurer);
        let mut target = TargetObject::OperatingSystemConfig(osc);
        m.mutate(&mut target).await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_payload_aborts_with_step_context() {
        let mut osc = reconcile_osc();
        osc.spec.files[0].content.inline = Some(FileContentInline {
            encoding: "b64".to_string(),
            data: "!!! not base64 !!!".to_string(),
        });

        let mut ensurer = MockEnsurer::new();
        // Step 1 still runs and keeps its mutation; step 2 aborts the dispatch.
        ensurer
            .expect_ensure_kubelet_service_unit_options()
            .times(1)
            .returning(Ok);

        let m = mutator(ensurer);
        let mut target = TargetObject::OperatingSystemConfig(osc);
        let err = m.mutate(&mut target).await.unwrap_err();
        assert!(err.to_string().contains("mutating kubelet configuration"));
    }

    #[test]
    fn from_dynamic_maps_known_kinds_and_passes_others() {
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "kube-apiserver", "namespace": "shoot--foo--bar" },
            "spec": { "clusterIP": "10.0.0.1" }
        }))
        .unwrap();

        let target = TargetObject::from_dynamic(&obj).unwrap().unwrap();
        assert_eq!(target.kind(), "Service");
        assert_eq!(target.name(), Some("kube-apiserver"));

        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "foo" }
        }))
        .unwrap();
        assert!(TargetObject::from_dynamic(&obj).unwrap().is_none());
    }
}
