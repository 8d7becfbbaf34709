//! Kernel IP forwarding toggle
//!
//! Remembers the value found at setup so teardown restores the host to
//! whatever it was doing before, instead of blindly disabling.

use std::fs;
use std::path::PathBuf;

use tracing::{info, warn};

use apsnare_core::Result;

#[derive(Debug)]
pub struct IpForwarding {
    path: PathBuf,
    prior: Option<String>,
}

impl IpForwarding {
    pub fn new(path: PathBuf) -> Self {
        Self { path, prior: None }
    }

    /// Record the current value and enable forwarding.
    pub fn enable(&mut self) -> Result<()> {
        let prior = fs::read_to_string(&self.path)?;
        self.prior = Some(prior.trim().to_string());
        fs::write(&self.path, "1")?;
        info!("IP forwarding enabled");
        Ok(())
    }

    /// Write back the recorded prior value. Consumes the record, so a
    /// second call is a no-op; never raises.
    pub fn restore(&mut self) {
        let Some(prior) = self.prior.take() else {
            return;
        };
        match fs::write(&self.path, &prior) {
            Ok(()) => info!(value = %prior, "IP forwarding restored"),
            Err(e) => warn!(error = %e, "could not restore IP forwarding"),
        }
    }

    /// Value recorded at enable time, if any
    pub fn prior(&self) -> Option<&str> {
        self.prior.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn enable_then_restore_round_trips() {
        let tmp = TempDir::new().unwrap();
        let toggle = tmp.path().join("ip_forward");
        fs::write(&toggle, "0\n").unwrap();

        let mut forwarding = IpForwarding::new(toggle.clone());
        forwarding.enable().unwrap();
        assert_eq!(fs::read_to_string(&toggle).unwrap(), "1");
        assert_eq!(forwarding.prior(), Some("0"));

        forwarding.restore();
        assert_eq!(fs::read_to_string(&toggle).unwrap(), "0");
    }

    #[test]
    fn restore_without_enable_is_a_noop() {
        let tmp = TempDir::new().unwrap();
        let toggle = tmp.path().join("ip_forward");
        fs::write(&toggle, "1\n").unwrap();

        let mut forwarding = IpForwarding::new(toggle.clone());
        forwarding.restore();
        assert_eq!(fs::read_to_string(&toggle).unwrap(), "1\n");
    }

    #[test]
    fn preserves_already_enabled_hosts() {
        let tmp = TempDir::new().unwrap();
        let toggle = tmp.path().join("ip_forward");
        fs::write(&toggle, "1\n").unwrap();

        let mut forwarding = IpForwarding::new(toggle.clone());
        forwarding.enable().unwrap();
        forwarding.restore();
        assert_eq!(fs::read_to_string(&toggle).unwrap(), "1");
    }

    #[test]
    fn enable_fails_on_missing_toggle() {
        let mut forwarding = IpForwarding::new(PathBuf::from("/definitely/not/here"));
        assert!(forwarding.enable().is_err());
    }
}
