//! Lifecycle and process state types shared across the workspace

use std::fmt;

/// Overall state of a run; owned and mutated exclusively by the
/// lifecycle controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Configuring,
    Running,
    TearingDown,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Configuring => "configuring",
            LifecycleState::Running => "running",
            LifecycleState::TearingDown => "tearing-down",
            LifecycleState::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

/// Stage of the setup sequence, used to attribute a failure to the step
/// that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    Dependencies,
    HostServices,
    InterfaceConfig,
    ConfigWrite,
    PortalBind,
    IpForwarding,
    Redirection,
    ProcessStart,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SetupStage::Dependencies => "dependency check",
            SetupStage::HostServices => "host services",
            SetupStage::InterfaceConfig => "interface configuration",
            SetupStage::ConfigWrite => "config generation",
            SetupStage::PortalBind => "portal binding",
            SetupStage::IpForwarding => "ip forwarding",
            SetupStage::Redirection => "traffic redirection",
            SetupStage::ProcessStart => "process startup",
        };
        write!(f, "{name}")
    }
}

/// Kind of external daemon managed by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessKind {
    /// Software access-point controller (one per radio)
    ApDaemon,
    /// Combined DHCP lease + DNS sinkhole daemon (one per run)
    DnsDhcpDaemon,
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessKind::ApDaemon => "ap daemon",
            ProcessKind::DnsDhcpDaemon => "dns/dhcp daemon",
        };
        write!(f, "{name}")
    }
}

/// State of a managed daemon. Transitions only move forward; an explicit
/// kill forces `Terminated` from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServiceState {
    Starting,
    Running,
    Failed,
    Terminated,
}

impl ServiceState {
    /// Advance to `next` if that is a forward transition, otherwise keep
    /// the current state.
    pub fn advance(self, next: ServiceState) -> ServiceState {
        if next >= self { next } else { self }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Failed => "failed",
            ServiceState::Terminated => "terminated",
        };
        write!(f, "{name}")
    }
}

/// Individual step of bringing an interface to its managed L3 state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceStep {
    LinkDown,
    AddrFlush,
    AddrAdd,
    LinkUp,
}

impl fmt::Display for InterfaceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InterfaceStep::LinkDown => "link down",
            InterfaceStep::AddrFlush => "address flush",
            InterfaceStep::AddrAdd => "address add",
            InterfaceStep::LinkUp => "link up",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_state_is_monotonic() {
        let state = ServiceState::Starting;
        let state = state.advance(ServiceState::Running);
        assert_eq!(state, ServiceState::Running);

        // no going back
        assert_eq!(state.advance(ServiceState::Starting), ServiceState::Running);

        let failed = state.advance(ServiceState::Failed);
        assert_eq!(failed, ServiceState::Failed);
        assert_eq!(failed.advance(ServiceState::Running), ServiceState::Failed);
    }

    #[test]
    fn kill_terminates_from_any_state() {
        for state in [
            ServiceState::Starting,
            ServiceState::Running,
            ServiceState::Failed,
            ServiceState::Terminated,
        ] {
            assert_eq!(
                state.advance(ServiceState::Terminated),
                ServiceState::Terminated
            );
        }
    }
}
