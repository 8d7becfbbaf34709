//! Firewall traffic redirection
//!
//! NAT PREROUTING rules forcing every client's web and DNS traffic into
//! the locally hosted portal and sinkhole. Rule position affects matching,
//! so the applied sequence is recorded and revoked in exact reverse order.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use apsnare_core::{Error, Result};

use crate::host::CommandRunner;

/// One applied NAT redirect rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectRule {
    pub table: &'static str,
    pub chain: &'static str,
    pub interface: String,
    pub protocol: &'static str,
    pub dport: u16,
    pub to_ports: u16,
}

impl RedirectRule {
    /// argv for applying this rule
    pub fn add_argv(&self) -> Vec<String> {
        self.argv("-A")
    }

    /// argv for the deletion form of this rule
    pub fn delete_argv(&self) -> Vec<String> {
        self.argv("-D")
    }

    fn argv(&self, action: &str) -> Vec<String> {
        vec![
            "iptables".to_string(),
            "-t".to_string(),
            self.table.to_string(),
            action.to_string(),
            self.chain.to_string(),
            "-i".to_string(),
            self.interface.clone(),
            "-p".to_string(),
            self.protocol.to_string(),
            "--dport".to_string(),
            self.dport.to_string(),
            "-j".to_string(),
            "REDIRECT".to_string(),
            "--to-ports".to_string(),
            self.to_ports.to_string(),
        ]
    }
}

impl fmt::Display for RedirectRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} -i {} -p {} dport {} -> :{}",
            self.table, self.chain, self.interface, self.protocol, self.dport, self.to_ports
        )
    }
}

/// The three redirect rules a managed interface needs: web to the portal,
/// DNS over both transports to the sinkhole.
pub fn rules_for(interface: &str) -> [RedirectRule; 3] {
    let rule = |protocol: &'static str, dport: u16, to_ports: u16| RedirectRule {
        table: "nat",
        chain: "PREROUTING",
        interface: interface.to_string(),
        protocol,
        dport,
        to_ports,
    };
    [rule("tcp", 80, 80), rule("udp", 53, 53), rule("tcp", 53, 53)]
}

/// Ordered record of applied rules, undone back-to-front
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<RedirectRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> &[RedirectRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn push(&mut self, rule: RedirectRule) {
        self.rules.push(rule);
    }
}

pub struct Redirector {
    runner: Arc<dyn CommandRunner>,
}

impl Redirector {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Apply the redirect set for `interface`, appending each rule to
    /// `applied` as it lands so a mid-sequence failure still leaves an
    /// accurate undo ledger.
    pub fn apply(&self, interface: &str, applied: &mut RuleSet) -> Result<()> {
        for rule in rules_for(interface) {
            let argv = rule.add_argv();
            let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
            self.runner
                .run(&argv)
                .map_err(|e| Error::RedirectionRule {
                    interface: interface.to_string(),
                    cause: e.to_string(),
                })?;
            applied.push(rule);
        }
        debug!(iface = %interface, "redirection rules applied");
        Ok(())
    }

    /// Remove every applied rule in reverse insertion order. Best-effort:
    /// a rule that is already gone is not an error, and nothing here ever
    /// raises.
    pub fn revoke(&self, applied: &RuleSet) {
        for rule in applied.rules().iter().rev() {
            let argv = rule.delete_argv();
            let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
            if let Err(e) = self.runner.run(&argv) {
                warn!(rule = %rule, error = %e, "could not delete redirection rule");
            }
        }
        debug!(count = applied.len(), "redirection rules revoked");
    }
}
