//! Resolved run configuration

use std::fmt;

use crate::{Error, NetworkPlan, PortalTheme, RadioProfile, Result};

/// Topology of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One radio on one band
    Single,
    /// Two radios broadcasting the same SSID on 2.4 GHz and 5 GHz at once
    Dual,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Single => write!(f, "single"),
            RunMode::Dual => write!(f, "dual"),
        }
    }
}

/// Immutable inputs of a run, constructed once and validated up front
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub plan: NetworkPlan,
    pub radios: Vec<RadioProfile>,
    pub theme: PortalTheme,
}

impl RunConfig {
    /// Single-radio configuration
    pub fn single(plan: NetworkPlan, radio: RadioProfile, theme: PortalTheme) -> Self {
        Self {
            plan,
            radios: vec![radio],
            theme,
        }
    }

    /// Dual-radio configuration: exactly two radios with distinct
    /// interfaces and distinct bands.
    pub fn dual(
        plan: NetworkPlan,
        first: RadioProfile,
        second: RadioProfile,
        theme: PortalTheme,
    ) -> Result<Self> {
        if first.interface == second.interface {
            return Err(Error::Config(format!(
                "dual mode needs two distinct interfaces, got '{}' twice",
                first.interface
            )));
        }
        if first.band == second.band {
            return Err(Error::Config(format!(
                "dual mode needs one radio per band, got {} twice",
                first.band
            )));
        }
        Ok(Self {
            plan,
            radios: vec![first, second],
            theme,
        })
    }

    /// Topology implied by the declared radios
    pub fn mode(&self) -> RunMode {
        if self.radios.len() == 2 {
            RunMode::Dual
        } else {
            RunMode::Single
        }
    }

    /// Interface names in declaration order
    pub fn interfaces(&self) -> Vec<&str> {
        self.radios.iter().map(|r| r.interface.as_str()).collect()
    }
}
