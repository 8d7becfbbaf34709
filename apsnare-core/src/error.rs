//! Error types for apsnare

use std::path::PathBuf;

use thiserror::Error;

use crate::lifecycle::{InterfaceStep, LifecycleState, ProcessKind, SetupStage};

/// Result type alias for apsnare operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for apsnare
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing host privileges; raised before any mutation
    #[error("insufficient privileges: {0}")]
    Privilege(String),

    /// A required external tool is not installed; checked before any mutation
    #[error("required dependency missing: {0}")]
    DependencyMissing(String),

    /// The CIDR block cannot produce a usable gateway and DHCP range
    #[error("invalid network plan: {0}")]
    NetworkPlan(String),

    /// Radio parameters out of range for the selected band
    #[error("invalid radio profile: {0}")]
    RadioProfile(String),

    /// Run configuration rejected
    #[error("invalid run configuration: {0}")]
    Config(String),

    /// A host command exited unsuccessfully or could not be spawned
    #[error("command '{command}' failed: {detail}")]
    Command { command: String, detail: String },

    /// Interface does not exist on this host
    #[error("interface '{0}' not found")]
    InterfaceMissing(String),

    /// One of the link/address steps failed; earlier steps stay applied
    /// until teardown flushes them
    #[error("interface '{interface}' configuration failed at {step}: {cause}")]
    InterfaceConfig {
        interface: String,
        step: InterfaceStep,
        cause: String,
    },

    /// Filesystem failure while producing a generated file
    #[error("failed to write {path}: {cause}")]
    ConfigWrite { path: PathBuf, cause: String },

    /// A portal theme asset required by the manifest is absent
    #[error("portal theme asset missing: {0}")]
    ThemeAssetMissing(PathBuf),

    /// Daemon exited inside the startup grace window; `output` carries
    /// everything it printed before dying
    #[error("{kind} exited during startup:\n{output}")]
    ProcessStart { kind: ProcessKind, output: String },

    /// Firewall rule application failed during setup
    #[error("redirection rule failed on '{interface}': {cause}")]
    RedirectionRule { interface: String, cause: String },

    /// Operation interrupted by a shutdown request
    #[error("interrupted: {0}")]
    Interrupted(String),

    /// Setup aborted; teardown of the applied portion has already run
    #[error("setup failed at {stage}: {cause}")]
    Setup {
        stage: SetupStage,
        #[source]
        cause: Box<Error>,
    },

    /// A run is already active on this controller
    #[error("a run is already active (state {0})")]
    NotIdle(LifecycleState),
}

impl Error {
    /// Create a command error with a custom message
    pub fn command<S: Into<String>>(command: S, detail: S) -> Self {
        Error::Command {
            command: command.into(),
            detail: detail.into(),
        }
    }

    /// Wrap a stage failure into a setup error
    pub fn setup(stage: SetupStage, cause: Error) -> Self {
        Error::Setup {
            stage,
            cause: Box::new(cause),
        }
    }

    /// Stage of the setup sequence this error belongs to, if any
    pub fn stage(&self) -> Option<SetupStage> {
        match self {
            Error::Setup { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
