//! Generated daemon configuration
//!
//! Pure renderers for the DNS/DHCP daemon and per-radio AP daemon configs,
//! plus writers that persist them under the run's config directory. Output
//! is a deterministic function of the inputs and always overwrites.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use apsnare_core::netplan::DHCP_LEASE_TIME;
use apsnare_core::{Error, NetworkPlan, RadioProfile, Result};

use crate::paths::HostPaths;

/// Connectivity-check hostnames the client OSes probe; pointing them at
/// the gateway makes captive-portal detection fire promptly.
pub const CONNECTIVITY_DOMAINS: [&str; 3] = [
    "captive.apple.com",
    "www.msftconnecttest.com",
    "connectivitycheck.gstatic.com",
];

pub struct ServiceConfigWriter {
    paths: HostPaths,
}

impl ServiceConfigWriter {
    pub fn new(paths: HostPaths) -> Self {
        Self { paths }
    }

    /// Write the DNS/DHCP daemon config covering `interfaces` and return
    /// its path. With two interfaces every DHCP option is scoped
    /// per-interface so a single daemon instance serves both radios.
    pub fn write_dns_dhcp(&self, interfaces: &[&str], plan: &NetworkPlan) -> Result<PathBuf> {
        let path = self.paths.dnsmasq_conf();
        write_config(&path, &render_dns_dhcp(interfaces, plan))?;
        info!(path = %path.display(), "wrote dns/dhcp config");
        Ok(path)
    }

    /// Write the AP daemon config for one radio and return its path.
    pub fn write_ap(&self, radio: &RadioProfile) -> Result<PathBuf> {
        let path = self.paths.hostapd_conf(radio.band);
        write_config(&path, &render_ap(radio))?;
        info!(path = %path.display(), iface = %radio.interface, "wrote ap config");
        Ok(path)
    }
}

/// Render the DNS/DHCP daemon config: per-interface binding and leases,
/// gateway as router and resolver, wildcard sinkhole plus the explicit
/// connectivity-check entries.
pub fn render_dns_dhcp(interfaces: &[&str], plan: &NetworkPlan) -> String {
    let gw = plan.gateway();
    let mut out = String::new();

    for iface in interfaces {
        out.push_str(&format!("interface={iface}\n"));
    }
    out.push_str("bind-interfaces\n");
    out.push_str("no-resolv\n");
    out.push_str("log-queries\n");

    if interfaces.len() == 1 {
        out.push_str(&format!(
            "dhcp-range={},{},{DHCP_LEASE_TIME}\n",
            plan.dhcp_start(),
            plan.dhcp_end()
        ));
        out.push_str(&format!("dhcp-option=3,{gw}\n"));
        out.push_str(&format!("dhcp-option=6,{gw}\n"));
    } else {
        for iface in interfaces {
            out.push_str(&format!(
                "dhcp-range={iface},{},{},{DHCP_LEASE_TIME}\n",
                plan.dhcp_start(),
                plan.dhcp_end()
            ));
        }
        for iface in interfaces {
            out.push_str(&format!("dhcp-option={iface},3,{gw}\n"));
        }
        for iface in interfaces {
            out.push_str(&format!("dhcp-option={iface},6,{gw}\n"));
        }
    }

    out.push_str(&format!("address=/#/{gw}\n"));
    for domain in CONNECTIVITY_DOMAINS {
        out.push_str(&format!("address=/{domain}/{gw}\n"));
    }

    out
}

/// Render the AP daemon config for one radio.
pub fn render_ap(radio: &RadioProfile) -> String {
    format!(
        "interface={}\n\
         driver=nl80211\n\
         ssid={}\n\
         hw_mode={}\n\
         channel={}\n\
         auth_algs=1\n\
         wmm_enabled={}\n",
        radio.interface,
        radio.ssid,
        radio.band.hw_mode(),
        radio.channel,
        radio.band.wmm_enabled()
    )
}

fn write_config(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::ConfigWrite {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
    }
    fs::write(path, content).map_err(|e| Error::ConfigWrite {
        path: path.to_path_buf(),
        cause: e.to_string(),
    })
}
