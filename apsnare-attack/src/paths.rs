//! Host filesystem layout for a run
//!
//! Everything a run writes or touches on the host lives behind this one
//! struct so tests can point the whole stack at a scratch directory and
//! substitute the daemon binaries.

use std::path::{Path, PathBuf};

use apsnare_core::Band;

/// Locations and binary names used by a run, with production defaults
#[derive(Debug, Clone)]
pub struct HostPaths {
    /// Directory receiving generated daemon configs
    pub conf_dir: PathBuf,
    /// Web root of the single-mode / shared portal experience
    pub web_root: PathBuf,
    /// Web root of the dual-mode portal experience
    pub web_root_dual: PathBuf,
    /// Web server's sites-available directory
    pub sites_available: PathBuf,
    /// Our vhost file name (also the a2ensite site argument)
    pub vhost_site: String,
    /// Second vhost for the dual experience
    pub vhost_site_dual: String,
    /// The distribution's default site, restored at teardown
    pub default_site: String,
    /// Directory holding the portal theme sources
    pub theme_root: PathBuf,
    /// Portal credential log (written by the portal's submission endpoint)
    pub portal_log: PathBuf,
    /// Dual-experience twin of the portal log
    pub portal_log_dual: PathBuf,
    /// Kernel IPv4 forwarding toggle
    pub ip_forward: PathBuf,
    /// DNS/DHCP daemon binary
    pub dnsmasq_bin: String,
    /// AP daemon binary
    pub hostapd_bin: String,
    /// Service account owning the portal log
    pub web_user: String,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            conf_dir: PathBuf::from("/etc/apsnare"),
            web_root: PathBuf::from("/var/www/captive"),
            web_root_dual: PathBuf::from("/var/www/captive_dual"),
            sites_available: PathBuf::from("/etc/apache2/sites-available"),
            vhost_site: "apsnare.conf".to_string(),
            vhost_site_dual: "apsnare-dual.conf".to_string(),
            default_site: "000-default.conf".to_string(),
            theme_root: PathBuf::from("themes"),
            portal_log: PathBuf::from("/var/log/apsnare-portal.log"),
            portal_log_dual: PathBuf::from("/var/log/apsnare-portal-dual.log"),
            ip_forward: PathBuf::from("/proc/sys/net/ipv4/ip_forward"),
            dnsmasq_bin: "dnsmasq".to_string(),
            hostapd_bin: "hostapd".to_string(),
            web_user: "www-data".to_string(),
        }
    }
}

impl HostPaths {
    /// Generated DNS/DHCP daemon config
    pub fn dnsmasq_conf(&self) -> PathBuf {
        self.conf_dir.join("dnsmasq.conf")
    }

    /// Generated AP daemon config for one band
    pub fn hostapd_conf(&self, band: Band) -> PathBuf {
        self.conf_dir
            .join(format!("hostapd-{}.conf", band.config_suffix()))
    }

    /// Full path of our vhost definition
    pub fn vhost_path(&self) -> PathBuf {
        self.sites_available.join(&self.vhost_site)
    }

    /// Full path of the dual-experience vhost definition
    pub fn vhost_path_dual(&self) -> PathBuf {
        self.sites_available.join(&self.vhost_site_dual)
    }

    /// Process name of the DNS/DHCP daemon, for stale-instance sweeps
    pub fn dnsmasq_process_name(&self) -> String {
        file_name(&self.dnsmasq_bin)
    }
}

fn file_name(bin: &str) -> String {
    Path::new(bin)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| bin.to_string())
}
