//! External daemon supervision
//!
//! Spawns the AP and DNS/DHCP daemons, verifies they survive a startup
//! grace window, tails their output for station events from a detached
//! task per process, polls liveness for the monitor loop, and terminates
//! everything on teardown (signal, bounded wait, force-kill).

use std::process::Stdio;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use apsnare_core::{Error, ProcessKind, Result, ServiceState};

/// How long a daemon gets to crash before we call it alive
pub const STARTUP_GRACE: Duration = Duration::from_secs(2);

/// How long a daemon gets to honor SIGTERM before being killed
pub const TERM_TIMEOUT: Duration = Duration::from_secs(3);

static STA_CONNECTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)AP-STA-CONNECTED\s+([0-9a-f:]{17})").expect("static pattern")
});
static STA_DISCONNECTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)AP-STA-DISCONNECTED\s+([0-9a-f:]{17})").expect("static pattern")
});
static STA_ASSOCIATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)STA\s+([0-9a-f:]{17}).*(authenticated|associated)").expect("static pattern")
});

/// Launch specification for a managed daemon
#[derive(Debug, Clone)]
pub struct ServiceCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ServiceCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// A managed external daemon
pub struct ServiceProcess {
    pub id: Uuid,
    pub kind: ProcessKind,
    /// Interface or daemon name used to tag event lines
    pub tag: String,
    state: ServiceState,
    child: Child,
    tail: Option<JoinHandle<()>>,
}

impl ServiceProcess {
    pub fn state(&self) -> ServiceState {
        self.state
    }

    fn advance(&mut self, next: ServiceState) {
        self.state = self.state.advance(next);
    }
}

/// Liveness snapshot of one managed process
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub id: Uuid,
    pub kind: ProcessKind,
    pub tag: String,
    pub alive: bool,
}

/// Supervises the run's external daemons
pub struct ProcessSupervisor {
    processes: DashMap<Uuid, ServiceProcess>,
    order: Mutex<Vec<Uuid>>,
    grace: Duration,
    term_timeout: Duration,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::with_timings(STARTUP_GRACE, TERM_TIMEOUT)
    }

    /// Supervisor with custom grace and termination windows
    pub fn with_timings(grace: Duration, term_timeout: Duration) -> Self {
        Self {
            processes: DashMap::new(),
            order: Mutex::new(Vec::new()),
            grace,
            term_timeout,
        }
    }

    /// Spawn a daemon and verify it survives the startup grace window.
    ///
    /// An early exit drains everything the process printed into a
    /// [`Error::ProcessStart`]. On success a detached task starts tailing
    /// the daemon's output for station events.
    pub async fn start(
        &self,
        kind: ProcessKind,
        tag: &str,
        command: &ServiceCommand,
    ) -> Result<Uuid> {
        info!(kind = %kind, tag = %tag, program = %command.program, "starting daemon");
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ProcessStart {
                kind,
                output: format!("failed to spawn {}: {e}", command.program),
            })?;

        sleep(self.grace).await;

        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                let output = drain_output(&mut child).await;
                error!(kind = %kind, tag = %tag, %status, "daemon exited during startup");
                return Err(Error::ProcessStart { kind, output });
            }
            Err(e) => {
                return Err(Error::ProcessStart {
                    kind,
                    output: format!("could not poll daemon: {e}"),
                });
            }
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let tail = tokio::spawn(tail_station_events(tag.to_string(), stdout, stderr));

        let id = Uuid::now_v7();
        let mut process = ServiceProcess {
            id,
            kind,
            tag: tag.to_string(),
            state: ServiceState::Starting,
            child,
            tail: Some(tail),
        };
        process.advance(ServiceState::Running);
        self.processes.insert(id, process);
        self.order
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(id);
        info!(kind = %kind, tag = %tag, id = %id, "daemon running");
        Ok(id)
    }

    /// Poll liveness of every managed process, in start order.
    pub fn poll(&self) -> Vec<ProcessReport> {
        let ids: Vec<Uuid> = self
            .order
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(mut entry) = self.processes.get_mut(&id) {
                let alive = match entry.child.try_wait() {
                    Ok(None) => true,
                    Ok(Some(status)) => {
                        if entry.state() == ServiceState::Running {
                            warn!(tag = %entry.tag, %status, "daemon exited");
                            entry.advance(ServiceState::Failed);
                        }
                        false
                    }
                    Err(e) => {
                        warn!(tag = %entry.tag, error = %e, "could not poll daemon");
                        false
                    }
                };
                reports.push(ProcessReport {
                    id,
                    kind: entry.kind,
                    tag: entry.tag.clone(),
                    alive,
                });
            }
        }
        reports
    }

    /// Number of managed processes
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Terminate every managed daemon in start order: SIGTERM, bounded
    /// wait, SIGKILL on timeout. Never raises.
    pub async fn stop_all(&self) {
        let ids: Vec<Uuid> = self
            .order
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for id in ids {
            if let Some((_, mut process)) = self.processes.remove(&id) {
                self.terminate(&mut process).await;
            }
        }
        self.order
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    async fn terminate(&self, process: &mut ServiceProcess) {
        info!(tag = %process.tag, kind = %process.kind, "stopping daemon");
        if let Some(pid) = process.child.id() {
            let pid = nix::unistd::Pid::from_raw(pid as i32);
            if let Err(e) = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM) {
                debug!(tag = %process.tag, error = %e, "SIGTERM delivery failed");
            }
        }
        match timeout(self.term_timeout, process.child.wait()).await {
            Ok(Ok(status)) => debug!(tag = %process.tag, %status, "daemon stopped"),
            Ok(Err(e)) => warn!(tag = %process.tag, error = %e, "wait failed"),
            Err(_) => {
                warn!(tag = %process.tag, "daemon ignored SIGTERM, killing");
                if let Err(e) = process.child.kill().await {
                    warn!(tag = %process.tag, error = %e, "kill failed");
                }
            }
        }
        process.advance(ServiceState::Terminated);
        if let Some(tail) = process.tail.take() {
            tail.abort();
        }
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Collect whatever a dead process left in its pipes.
async fn drain_output(child: &mut Child) -> String {
    let mut output = String::new();
    if let Some(mut stdout) = child.stdout.take() {
        let mut buf = String::new();
        if stdout.read_to_string(&mut buf).await.is_ok() {
            output.push_str(&buf);
        }
    }
    if let Some(mut stderr) = child.stderr.take() {
        let mut buf = String::new();
        if stderr.read_to_string(&mut buf).await.is_ok() {
            output.push_str(&buf);
        }
    }
    let trimmed = output.trim();
    if trimmed.is_empty() {
        "(no output captured)".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Does this daemon output line describe a station event worth surfacing?
fn is_station_event(line: &str) -> bool {
    STA_CONNECTED.is_match(line)
        || STA_DISCONNECTED.is_match(line)
        || STA_ASSOCIATED.is_match(line)
}

/// Read both output streams of one daemon line by line, re-emitting only
/// station event lines tagged with the daemon's name. Ends at EOF on both
/// streams; read-only with respect to supervisor state.
async fn tail_station_events(
    tag: String,
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
) {
    let mut out = stdout.map(|s| BufReader::new(s).lines());
    let mut err = stderr.map(|s| BufReader::new(s).lines());

    loop {
        tokio::select! {
            line = next_line(&mut out), if out.is_some() => match line {
                Some(line) => emit(&tag, &line),
                None => out = None,
            },
            line = next_line(&mut err), if err.is_some() => match line {
                Some(line) => emit(&tag, &line),
                None => err = None,
            },
            else => break,
        }
    }
    debug!(tag = %tag, "log tail finished");
}

async fn next_line<R>(lines: &mut Option<Lines<BufReader<R>>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => None,
    }
}

fn emit(tag: &str, line: &str) {
    let line = line.trim();
    if is_station_event(line) {
        info!(daemon = %tag, "{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_supervisor() -> ProcessSupervisor {
        ProcessSupervisor::with_timings(Duration::from_millis(100), Duration::from_millis(300))
    }

    fn sh(script: &str) -> ServiceCommand {
        ServiceCommand::new("/bin/sh", vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn early_exit_surfaces_captured_output() {
        let supervisor = fast_supervisor();
        let result = supervisor
            .start(
                ProcessKind::DnsDhcpDaemon,
                "dnsmasq",
                &sh("echo 'failed to bind 0.0.0.0:53' >&2; exit 2"),
            )
            .await;

        match result {
            Err(Error::ProcessStart { kind, output }) => {
                assert_eq!(kind, ProcessKind::DnsDhcpDaemon);
                assert!(output.contains("failed to bind"), "got: {output}");
            }
            other => panic!("expected ProcessStart error, got {other:?}"),
        }
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn healthy_daemon_runs_and_stops() {
        let supervisor = fast_supervisor();
        let id = supervisor
            .start(ProcessKind::ApDaemon, "wlan0", &sh("sleep 30"))
            .await
            .unwrap();

        let reports = supervisor.poll();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].id, id);
        assert!(reports[0].alive);

        supervisor.stop_all().await;
        assert!(supervisor.is_empty());
        assert!(supervisor.poll().is_empty());
    }

    #[tokio::test]
    async fn death_after_startup_shows_up_in_poll() {
        let supervisor = fast_supervisor();
        supervisor
            .start(ProcessKind::ApDaemon, "wlan0", &sh("sleep 0.3"))
            .await
            .unwrap();

        sleep(Duration::from_millis(500)).await;
        let reports = supervisor.poll();
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].alive);
    }

    #[tokio::test]
    async fn sigterm_resistant_daemon_gets_killed() {
        let supervisor = fast_supervisor();
        supervisor
            .start(
                ProcessKind::ApDaemon,
                "wlan0",
                &sh("trap '' TERM; sleep 30"),
            )
            .await
            .unwrap();

        // must return despite the ignored SIGTERM
        supervisor.stop_all().await;
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn spawn_failure_is_a_process_start_error() {
        let supervisor = fast_supervisor();
        let result = supervisor
            .start(
                ProcessKind::ApDaemon,
                "wlan0",
                &ServiceCommand::new("/nonexistent/daemon", vec![]),
            )
            .await;
        assert!(matches!(result, Err(Error::ProcessStart { .. })));
    }

    #[test]
    fn station_event_patterns() {
        assert!(is_station_event(
            "wlan0: AP-STA-CONNECTED aa:bb:cc:dd:ee:ff"
        ));
        assert!(is_station_event(
            "wlan0: AP-STA-DISCONNECTED aa:bb:cc:dd:ee:ff"
        ));
        assert!(is_station_event(
            "wlan0: STA aa:bb:cc:dd:ee:ff IEEE 802.11: authenticated"
        ));
        assert!(is_station_event(
            "wlan0: STA aa:bb:cc:dd:ee:ff IEEE 802.11: associated (aid 1)"
        ));
        assert!(!is_station_event("dnsmasq: query[A] example.com"));
        assert!(!is_station_event("random chatter"));
    }
}
