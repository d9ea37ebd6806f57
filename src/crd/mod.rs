//! Custom Resource Definitions consumed by the Trellis core
//!
//! These are the framework-owned resources the core reads and mutates. The
//! machine resources mirror what the external machine-controller-manager
//! serves; the core only signals that controller and observes convergence,
//! it never provisions compute itself.

mod machine;
mod osc;
mod worker;

pub use machine::{
    ClassReference, FailedMachine, LastOperation, Machine, MachineDeployment,
    MachineDeploymentSpec, MachineDeploymentStatus, MachineSet, MachineSetSpec, MachineSpec,
    MachineTemplateSpec,
};
pub use osc::{
    ensure_file_with_path, file_with_path, unit_with_name, File, FileContent, FileContentInline,
    OperatingSystemConfig, OperatingSystemConfigPurpose, OperatingSystemConfigSpec, Unit,
};
pub use worker::{Worker, WorkerPool, WorkerSpec};
