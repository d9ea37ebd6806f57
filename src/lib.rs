//! Trellis - generic core for cluster-extension providers
//!
//! Trellis is the shared, provider-agnostic half of a cluster-extension
//! framework. Cloud-provider plugins implement two capability interfaces and
//! get one correct implementation of the hard generic machinery:
//!
//! - the **mutation pipeline**: a dispatcher that intercepts well-known
//!   control-plane objects, decodes their embedded configuration payloads,
//!   lets the provider's [`mutate::Ensurer`] adjust them, and re-encodes the
//!   result in place.
//! - the **deletion control loop**: the ordered, escalating, deadline-bounded
//!   teardown of a worker pool's machines and supporting resources, driven by
//!   the provider's [`worker::WorkerDelegate`].
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (Worker, OperatingSystemConfig, machine types)
//! - [`cluster`] - Cluster context resolution from a control-plane namespace
//! - [`codec`] - Codecs for embedded configuration payloads
//! - [`chart`] - Rendered-manifest charts and the chart applier
//! - [`mutate`] - The `Ensurer` capability and the mutation dispatcher
//! - [`worker`] - The `WorkerDelegate` capability and the teardown loop
//! - [`error`] - Error types for the core
//!
//! The core never talks to a cloud API and never owns webhook or controller
//! transport; it is a library invoked by an external reconciliation and
//! admission host.

#![deny(missing_docs)]

pub mod chart;
pub mod cluster;
pub mod codec;
pub mod crd;
pub mod error;
pub mod mutate;
pub mod worker;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Well-Known Names and Paths
// =============================================================================
// The mutation dispatcher only touches a closed set of control-plane objects,
// identified by these fixed names, and a fixed set of file paths inside the
// operating system configuration.

/// Name of the kube-apiserver service and deployment
pub const KUBE_APISERVER_NAME: &str = "kube-apiserver";

/// Name of the kube-controller-manager deployment
pub const KUBE_CONTROLLER_MANAGER_NAME: &str = "kube-controller-manager";

/// Name of the kube-scheduler deployment
pub const KUBE_SCHEDULER_NAME: &str = "kube-scheduler";

/// Name of the main etcd stateful set
pub const ETCD_MAIN_NAME: &str = "etcd-main";

/// Name of the events etcd stateful set
pub const ETCD_EVENTS_NAME: &str = "etcd-events";

/// Name of the kubelet systemd unit inside an OperatingSystemConfig
pub const KUBELET_UNIT_NAME: &str = "kubelet.service";

/// Path of the kubelet configuration file on worker nodes
pub const KUBELET_CONFIG_PATH: &str = "/var/lib/kubelet/config/kubelet";

/// Path of the general kubernetes sysctl configuration file on worker nodes
pub const GENERAL_CONFIG_PATH: &str = "/etc/sysctl.d/99-k8s-general.conf";

/// Path of the kubelet cloud provider configuration file on worker nodes
pub const CLOUD_PROVIDER_CONFIG_PATH: &str = "/var/lib/kubelet/cloudprovider.conf";

/// File permissions for the provisioned cloud provider configuration
pub const CLOUD_PROVIDER_CONFIG_PERMISSIONS: i32 = 0o644;

// =============================================================================
// Teardown Constants
// =============================================================================

/// Default name of the machine-controller-manager deployment
pub const MACHINE_CONTROLLER_MANAGER_NAME: &str = "machine-controller-manager";

/// Label key marking a machine for forceful deletion
pub const FORCE_DELETION_LABEL_KEY: &str = "force-deletion";

/// Label value marking a machine for forceful deletion
pub const FORCE_DELETION_LABEL_VALUE: &str = "True";

/// Label selector identifying machine class secrets
pub const MACHINE_CLASS_SECRET_SELECTOR: &str = "trellis.dev/purpose=machineclass";

/// Name of the secret holding the kubeconfig for the target (shoot) cluster
pub const SHOOT_KUBECONFIG_SECRET_NAME: &str = "shoot-kubeconfig";

/// Namespace in the target cluster that receives controller chart resources
pub const SYSTEM_NAMESPACE: &str = "kube-system";
