//! Interface configuration
//!
//! Brings a wireless interface to the L3 state a run needs: link down,
//! flush stale addresses, assign the gateway address, link up. Steps run
//! in order and the first failure aborts; whatever was already applied is
//! left for teardown to flush.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tracing::{info, warn};

use apsnare_core::{Error, InterfaceStep, NetworkPlan, Result};

use crate::host::CommandRunner;

pub struct InterfaceConfigurator {
    runner: Arc<dyn CommandRunner>,
}

impl InterfaceConfigurator {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Probe that the interface exists before any mutation. Wired-looking
    /// names get a warning since they cannot enter AP mode.
    pub fn ensure_exists(&self, interface: &str) -> Result<()> {
        self.runner
            .run(&["ip", "link", "show", interface])
            .map_err(|_| Error::InterfaceMissing(interface.to_string()))?;
        if interface.starts_with("eth") || interface.starts_with("en") {
            warn!(
                iface = %interface,
                "interface looks wired; AP mode needs a wireless interface"
            );
        }
        Ok(())
    }

    /// Configure the interface for `plan` and return the gateway address
    /// now assigned to it.
    pub fn configure(&self, interface: &str, plan: &NetworkPlan) -> Result<Ipv4Addr> {
        self.step(interface, InterfaceStep::LinkDown, &["ip", "link", "set", interface, "down"])?;
        self.step(interface, InterfaceStep::AddrFlush, &["ip", "addr", "flush", "dev", interface])?;
        let gateway_cidr = plan.gateway_cidr();
        self.step(
            interface,
            InterfaceStep::AddrAdd,
            &["ip", "addr", "add", &gateway_cidr, "dev", interface],
        )?;
        self.step(interface, InterfaceStep::LinkUp, &["ip", "link", "set", interface, "up"])?;

        info!(iface = %interface, address = %gateway_cidr, "interface configured");
        Ok(plan.gateway())
    }

    /// Teardown-side flush: drop addresses and down the link, best-effort.
    pub fn flush(&self, interface: &str) {
        for argv in [
            ["ip", "addr", "flush", "dev", interface],
            ["ip", "link", "set", interface, "down"],
        ] {
            if let Err(e) = self.runner.run(&argv) {
                warn!(iface = %interface, error = %e, "interface flush step failed");
            }
        }
    }

    fn step(&self, interface: &str, step: InterfaceStep, argv: &[&str]) -> Result<()> {
        self.runner
            .run(argv)
            .map(drop)
            .map_err(|e| Error::InterfaceConfig {
                interface: interface.to_string(),
                step,
                cause: e.to_string(),
            })
    }
}
