//! Host command execution
//!
//! Every host mutation that shells out (`ip`, `iptables`, `systemctl`,
//! `a2ensite`, ...) goes through the [`CommandRunner`] seam so setup and
//! teardown sequences can be exercised without touching the machine.

use std::process::Command;

use tracing::{debug, warn};

use apsnare_core::{Error, Result};

/// Captured output of a finished host command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Executes host commands to completion
pub trait CommandRunner: Send + Sync {
    /// Run `argv` and capture its output. A command that cannot be spawned
    /// or exits non-zero is an error.
    fn run(&self, argv: &[&str]) -> Result<CommandOutput>;
}

/// Production runner backed by `std::process`
#[derive(Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[&str]) -> Result<CommandOutput> {
        let (program, args) = argv.split_first().ok_or_else(|| Error::Command {
            command: String::new(),
            detail: "empty command".to_string(),
        })?;

        debug!(command = %argv.join(" "), "running host command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::Command {
                command: argv.join(" "),
                detail: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let detail = if stderr.trim().is_empty() {
                format!("exit status {}", output.status)
            } else {
                stderr.trim().to_string()
            };
            return Err(Error::Command {
                command: argv.join(" "),
                detail,
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }
}

/// Refuse to run without an effective uid of 0.
pub fn require_root() -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        return Err(Error::Privilege(
            "this tool reconfigures interfaces and firewall rules and must run as root".to_string(),
        ));
    }
    Ok(())
}

/// Verify every external tool the run will invoke is present on PATH.
/// Runs before any host mutation.
pub fn check_dependencies(runner: &dyn CommandRunner, tools: &[&str]) -> Result<()> {
    let mut missing = Vec::new();
    for tool in tools {
        if runner.run(&["which", tool]).is_err() {
            missing.push(*tool);
        }
    }
    if !missing.is_empty() {
        return Err(Error::DependencyMissing(missing.join(", ")));
    }
    debug!(count = tools.len(), "all external tools present");
    Ok(())
}

/// Issue a `systemctl <action> <unit>`; failures are logged, not fatal,
/// since unit availability varies across lab hosts.
pub fn systemctl(runner: &dyn CommandRunner, action: &str, unit: &str) {
    if let Err(e) = runner.run(&["systemctl", action, unit]) {
        warn!(unit = %unit, action = %action, error = %e, "service command failed");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::{CommandOutput, CommandRunner};
    use apsnare_core::{Error, Result};

    /// Test double that records every command and optionally fails those
    /// whose joined argv contains a configured needle.
    #[derive(Default)]
    pub struct RecordingRunner {
        commands: Mutex<Vec<String>>,
        fail_on: Mutex<Vec<String>>,
    }

    impl RecordingRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_matching(&self, needle: &str) {
            self.fail_on.lock().unwrap().push(needle.to_string());
        }

        /// Every command issued so far, argv joined with spaces
        pub fn recorded(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }

        pub fn count_matching(&self, needle: &str) -> usize {
            self.recorded().iter().filter(|c| c.contains(needle)).count()
        }
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, argv: &[&str]) -> Result<CommandOutput> {
            let joined = argv.join(" ");
            self.commands.lock().unwrap().push(joined.clone());
            let failing = self
                .fail_on
                .lock()
                .unwrap()
                .iter()
                .any(|needle| joined.contains(needle.as_str()));
            if failing {
                return Err(Error::Command {
                    command: joined,
                    detail: "injected failure".to_string(),
                });
            }
            Ok(CommandOutput::default())
        }
    }
}
