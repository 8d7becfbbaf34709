//! apsnare attack orchestration
//!
//! This crate drives the whole lifecycle of a rogue-AP run: interface
//! configuration, generated daemon configs, captive-portal binding,
//! firewall redirection, daemon supervision with station-event tailing,
//! and the ordered, idempotent teardown that returns the host to its
//! prior state.

pub mod conf;
pub mod controller;
pub mod forward;
pub mod host;
pub mod iface;
pub mod paths;
pub mod portal;
pub mod redirect;
pub mod supervisor;

// Re-export commonly used types
pub use conf::ServiceConfigWriter;
pub use controller::LifecycleController;
pub use forward::IpForwarding;
pub use host::{require_root, CommandRunner, CommandOutput, SystemRunner};
pub use iface::InterfaceConfigurator;
pub use paths::HostPaths;
pub use portal::PortalBinder;
pub use redirect::{Redirector, RedirectRule, RuleSet};
pub use supervisor::{ProcessReport, ProcessSupervisor, ServiceCommand, ServiceProcess};
