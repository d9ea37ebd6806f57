//! Error types for the Trellis core
//!
//! Errors are structured with fields to aid debugging in production. Every
//! failure that crosses a stage boundary is wrapped with stage-identifying
//! context; nothing is swallowed. The core itself never retries beyond the
//! convergence poll's natural cadence - retry-on-failure belongs to the
//! caller, which re-invokes the idempotent entry points.

use thiserror::Error;

/// Main error type for Trellis operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Setup failure: delegate or client construction before any work started
    #[error("setup error: {message}")]
    Setup {
        /// Description of what failed to be constructed
        message: String,
    },

    /// Decode/encode failure for an embedded configuration payload
    #[error("could not {operation} {payload}: {message}")]
    Codec {
        /// Whether encoding or decoding failed ("decode" / "encode")
        operation: &'static str,
        /// Identity of the payload (e.g. "kubelet configuration")
        payload: String,
        /// Description of what went wrong
        message: String,
    },

    /// Serialization/deserialization error outside payload codecs
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Aggregate of failures collected from a concurrent fan-out
    #[error("{operation} failed: [{}]", join_errors(.errors))]
    Aggregate {
        /// The fan-out operation that produced the failures
        operation: String,
        /// Every underlying failure, none ignored
        errors: Vec<Error>,
    },

    /// A machine reported as failed while waiting for teardown convergence
    #[error("machine {machine} failed: {description}")]
    MachineFailed {
        /// Name of the failed machine
        machine: String,
        /// The failure description reported by the machine controller
        description: String,
    },

    /// A bounded wait elapsed before the observed state converged
    #[error("timed out {operation}")]
    Timeout {
        /// The operation that was being waited for
        operation: String,
    },

    /// The caller cancelled the operation
    #[error("cancelled {operation}")]
    Cancelled {
        /// The operation that was cancelled
        operation: String,
    },

    /// A named stage failed; wraps the underlying error with stage context
    #[error("{stage}: {source}")]
    Stage {
        /// Human-readable stage name
        stage: String,
        /// The error raised inside the stage
        #[source]
        source: Box<Error>,
    },

    /// Internal/operational error
    #[error("internal error: {message}")]
    Internal {
        /// Description of what failed
        message: String,
    },
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Create a setup error with the given message
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup {
            message: msg.into(),
        }
    }

    /// Create a decode error for the given payload
    pub fn decode(payload: impl Into<String>, msg: impl ToString) -> Self {
        Self::Codec {
            operation: "decode",
            payload: payload.into(),
            message: msg.to_string(),
        }
    }

    /// Create an encode error for the given payload
    pub fn encode(payload: impl Into<String>, msg: impl ToString) -> Self {
        Self::Codec {
            operation: "encode",
            payload: payload.into(),
            message: msg.to_string(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl ToString) -> Self {
        Self::Serialization {
            message: msg.to_string(),
        }
    }

    /// Create an aggregate error from a fan-out's collected failures
    pub fn aggregate(operation: impl Into<String>, errors: Vec<Error>) -> Self {
        Self::Aggregate {
            operation: operation.into(),
            errors,
        }
    }

    /// Create a fatal machine failure error
    pub fn machine_failed(machine: impl Into<String>, description: impl Into<String>) -> Self {
        Self::MachineFailed {
            machine: machine.into(),
            description: description.into(),
        }
    }

    /// Create a timeout error for the given operation
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a cancellation error for the given operation
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Wrap an error with stage-identifying context
    pub fn stage(stage: impl Into<String>, source: Error) -> Self {
        Self::Stage {
            stage: stage.into(),
            source: Box::new(source),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
        }
    }

    /// Check if re-invoking the failed operation may succeed
    ///
    /// Codec and serialization errors are not retryable (the payload itself is
    /// broken). A reported machine failure needs operator attention. Timeouts,
    /// cancellations, setup and transient Kubernetes errors are retryable via
    /// idempotent re-invocation.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::Setup { .. } => true,
            Error::Codec { .. } => false,
            Error::Serialization { .. } => false,
            Error::Aggregate { errors, .. } => errors.iter().any(Error::is_retryable),
            Error::MachineFailed { .. } => false,
            Error::Timeout { .. } => true,
            Error::Cancelled { .. } => true,
            Error::Stage { source, .. } => source.is_retryable(),
            Error::Internal { .. } => true,
        }
    }
}
