//! Lifecycle control
//!
//! The single owner of a run: drives the ordered setup sequence across
//! interfaces, generated configs, portal, firewall and daemons, monitors
//! the daemons while running, and performs the reverse-ordered idempotent
//! teardown on interruption or failure. All state lives on this one
//! instance; the signal path receives it by `Arc`, never through globals.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

use apsnare_core::{Error, LifecycleState, ProcessKind, Result, RunConfig, SetupStage};

use crate::conf::ServiceConfigWriter;
use crate::forward::IpForwarding;
use crate::host::{check_dependencies, systemctl, CommandRunner};
use crate::iface::InterfaceConfigurator;
use crate::paths::HostPaths;
use crate::portal::PortalBinder;
use crate::redirect::{Redirector, RuleSet};
use crate::supervisor::{ProcessSupervisor, ServiceCommand};

/// Host services paused for the duration of a run and restarted at teardown
const PAUSED_SERVICES: [&str; 2] = ["NetworkManager", "systemd-resolved"];

/// Cadence of the liveness monitor loop
const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Pause between the stale-daemon sweep and the first spawn
const SWEEP_SETTLE: Duration = Duration::from_millis(500);

type StageResult = std::result::Result<(), (SetupStage, Error)>;

/// Ledger of everything setup actually applied; teardown undoes exactly
/// this, nothing more.
#[derive(Debug, Default)]
struct AppliedState {
    services_paused: bool,
    configured_ifaces: Vec<String>,
    config_files: Vec<PathBuf>,
    web_server_touched: bool,
    rules: RuleSet,
}

pub struct LifecycleController {
    config: RunConfig,
    paths: HostPaths,
    runner: Arc<dyn CommandRunner>,
    supervisor: ProcessSupervisor,
    state: Mutex<LifecycleState>,
    applied: Mutex<AppliedState>,
    forwarding: Mutex<IpForwarding>,
    teardown_started: AtomicBool,
}

impl LifecycleController {
    pub fn new(
        config: RunConfig,
        paths: HostPaths,
        runner: Arc<dyn CommandRunner>,
        supervisor: ProcessSupervisor,
    ) -> Self {
        let forwarding = IpForwarding::new(paths.ip_forward.clone());
        Self {
            config,
            paths,
            runner,
            supervisor,
            state: Mutex::new(LifecycleState::Idle),
            applied: Mutex::new(AppliedState::default()),
            forwarding: Mutex::new(forwarding),
            teardown_started: AtomicBool::new(false),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Execute the full setup sequence. On any failure the applied portion
    /// is torn down before the error is returned; the run does not retry.
    pub async fn setup(&self) -> Result<()> {
        {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != LifecycleState::Idle {
                return Err(Error::NotIdle(*state));
            }
        }

        // checked before any mutation; nothing to undo on failure
        let tools = self.required_tools();
        let tools: Vec<&str> = tools.iter().map(String::as_str).collect();
        check_dependencies(self.runner.as_ref(), &tools)
            .map_err(|e| Error::setup(SetupStage::Dependencies, e))?;

        self.set_state(LifecycleState::Configuring);
        info!(mode = %self.config.mode(), plan = %self.config.plan, "setting up");

        match self.apply().await {
            Ok(()) => {
                self.set_state(LifecycleState::Running);
                for radio in &self.config.radios {
                    info!(
                        iface = %radio.interface,
                        band = %radio.band,
                        channel = radio.channel,
                        ssid = %radio.ssid,
                        "access point broadcasting"
                    );
                }
                Ok(())
            }
            Err((stage, cause)) => {
                error!(stage = %stage, error = %cause, "setup failed, rolling back");
                self.teardown().await;
                Err(Error::setup(stage, cause))
            }
        }
    }

    /// Monitor daemon liveness until one dies or teardown begins.
    pub async fn run_loop(&self) {
        info!("monitoring daemons; interrupt to stop and roll back");
        loop {
            sleep(MONITOR_INTERVAL).await;
            if self.teardown_started.load(Ordering::SeqCst) {
                return;
            }
            if self.state() != LifecycleState::Running {
                return;
            }
            let reports = self.supervisor.poll();
            if let Some(dead) = reports.iter().find(|r| !r.alive) {
                error!(
                    kind = %dead.kind,
                    tag = %dead.tag,
                    "daemon terminated unexpectedly, shutting down"
                );
                return;
            }
        }
    }

    /// Undo every applied host change, in reverse setup order. Idempotent:
    /// a second invocation, including one racing in from the signal path,
    /// is a no-op before any side effect. Each step is attempted even when
    /// earlier steps fail.
    pub async fn teardown(&self) {
        if self.teardown_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(LifecycleState::TearingDown);
        info!("tearing down");

        // 1. daemons: signal, bounded wait, force-kill
        self.supervisor.stop_all().await;

        // 2. firewall rules, exact reverse of application order
        {
            let applied = self.applied.lock().unwrap_or_else(|e| e.into_inner());
            Redirector::new(self.runner.clone()).revoke(&applied.rules);
        }

        // 3. IP forwarding back to its prior value
        self.forwarding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .restore();

        // 4. interface addresses
        let ifaces: Vec<String> = {
            let applied = self.applied.lock().unwrap_or_else(|e| e.into_inner());
            applied.configured_ifaces.clone()
        };
        let configurator = InterfaceConfigurator::new(self.runner.clone());
        for iface in &ifaces {
            configurator.flush(iface);
        }

        // 5. hand the radios back to the host's network management
        let services_paused = self
            .applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .services_paused;
        if services_paused {
            for service in PAUSED_SERVICES.iter().rev() {
                systemctl(self.runner.as_ref(), "start", service);
            }
        }

        // 6. portal: restore default site, drop our vhosts and web roots
        let web_server_touched = self
            .applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .web_server_touched;
        let binder = PortalBinder::new(self.runner.clone(), self.paths.clone());
        if web_server_touched {
            binder.unbind(self.config.mode());
            binder.remove_web_roots(self.config.mode());
        }

        // 7. generated config files
        let config_files: Vec<PathBuf> = {
            let applied = self.applied.lock().unwrap_or_else(|e| e.into_inner());
            applied.config_files.clone()
        };
        for path in config_files {
            match fs::remove_file(&path) {
                Ok(()) => info!(file = %path.display(), "removed generated config"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(file = %path.display(), error = %e, "could not remove config"),
            }
        }

        // 8. show the operator what the portal captured, then delete it
        if web_server_touched {
            binder.collect_logs(self.config.mode());
        }

        self.set_state(LifecycleState::Stopped);
        info!("teardown complete");
    }

    async fn apply(&self) -> StageResult {
        self.pause_host_services()?;
        self.configure_interfaces()?;
        self.write_configs()?;
        self.bind_portal()?;
        self.enable_forwarding()?;
        self.apply_redirection()?;
        self.start_daemons().await?;
        Ok(())
    }

    fn pause_host_services(&self) -> StageResult {
        self.checkpoint(SetupStage::HostServices)?;
        // best-effort: not every lab host runs these units
        for service in PAUSED_SERVICES {
            systemctl(self.runner.as_ref(), "stop", service);
        }
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .services_paused = true;
        Ok(())
    }

    /// All interfaces are probed and configured before any config file is
    /// written: the dual-mode DNS/DHCP config references both.
    fn configure_interfaces(&self) -> StageResult {
        self.checkpoint(SetupStage::InterfaceConfig)?;
        let configurator = InterfaceConfigurator::new(self.runner.clone());
        for radio in &self.config.radios {
            configurator
                .ensure_exists(&radio.interface)
                .map_err(|e| (SetupStage::InterfaceConfig, e))?;
        }
        for radio in &self.config.radios {
            // recorded before the attempt: a partially configured
            // interface still needs its flush at teardown
            self.applied
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .configured_ifaces
                .push(radio.interface.clone());
            configurator
                .configure(&radio.interface, &self.config.plan)
                .map_err(|e| (SetupStage::InterfaceConfig, e))?;
        }
        Ok(())
    }

    fn write_configs(&self) -> StageResult {
        self.checkpoint(SetupStage::ConfigWrite)?;
        let writer = ServiceConfigWriter::new(self.paths.clone());

        let interfaces = self.config.interfaces();
        let path = writer
            .write_dns_dhcp(&interfaces, &self.config.plan)
            .map_err(|e| (SetupStage::ConfigWrite, e))?;
        self.record_config_file(path);

        for radio in &self.config.radios {
            let path = writer
                .write_ap(radio)
                .map_err(|e| (SetupStage::ConfigWrite, e))?;
            self.record_config_file(path);
        }
        Ok(())
    }

    fn bind_portal(&self) -> StageResult {
        self.checkpoint(SetupStage::PortalBind)?;
        let binder = PortalBinder::new(self.runner.clone(), self.paths.clone());
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .web_server_touched = true;
        binder
            .prepare_web_server()
            .map_err(|e| (SetupStage::PortalBind, e))?;
        binder
            .bind(self.config.theme, self.config.mode())
            .map_err(|e| (SetupStage::PortalBind, e))?;
        Ok(())
    }

    fn enable_forwarding(&self) -> StageResult {
        self.checkpoint(SetupStage::IpForwarding)?;
        self.forwarding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .enable()
            .map_err(|e| (SetupStage::IpForwarding, e))
    }

    fn apply_redirection(&self) -> StageResult {
        self.checkpoint(SetupStage::Redirection)?;
        let redirector = Redirector::new(self.runner.clone());
        for radio in &self.config.radios {
            let mut applied = self.applied.lock().unwrap_or_else(|e| e.into_inner());
            redirector
                .apply(&radio.interface, &mut applied.rules)
                .map_err(|e| (SetupStage::Redirection, e))?;
        }
        Ok(())
    }

    async fn start_daemons(&self) -> StageResult {
        self.checkpoint(SetupStage::ProcessStart)?;

        // sweep stale instances from an earlier aborted run; pkill exits
        // non-zero when nothing matched
        let process_name = self.paths.dnsmasq_process_name();
        let _ = self.runner.run(&["pkill", &process_name]);
        sleep(SWEEP_SETTLE).await;

        let dnsmasq_conf = self.paths.dnsmasq_conf();
        let dnsmasq = ServiceCommand::new(
            &self.paths.dnsmasq_bin,
            vec![
                "-C".to_string(),
                dnsmasq_conf.display().to_string(),
                "-d".to_string(),
            ],
        );
        self.supervisor
            .start(ProcessKind::DnsDhcpDaemon, &process_name, &dnsmasq)
            .await
            .map_err(|e| (SetupStage::ProcessStart, e))?;

        for radio in &self.config.radios {
            let conf = self.paths.hostapd_conf(radio.band);
            let command =
                ServiceCommand::new(&self.paths.hostapd_bin, vec![conf.display().to_string()]);
            self.supervisor
                .start(ProcessKind::ApDaemon, &radio.interface, &command)
                .await
                .map_err(|e| (SetupStage::ProcessStart, e))?;
        }
        Ok(())
    }

    /// Bail out between stages once an interrupt-driven teardown has begun.
    fn checkpoint(&self, stage: SetupStage) -> StageResult {
        if self.teardown_started.load(Ordering::SeqCst) {
            return Err((
                stage,
                Error::Interrupted("shutdown requested during setup".to_string()),
            ));
        }
        Ok(())
    }

    fn record_config_file(&self, path: PathBuf) {
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .config_files
            .push(path);
    }

    fn required_tools(&self) -> Vec<String> {
        let mut tools: Vec<String> = [
            "ip", "iptables", "systemctl", "a2enmod", "a2ensite", "a2dissite", "pkill",
        ]
        .iter()
        .map(|t| t.to_string())
        .collect();
        tools.push(self.paths.dnsmasq_bin.clone());
        tools.push(self.paths.hostapd_bin.clone());
        tools
    }

    fn set_state(&self, next: LifecycleState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = next;
        info!(state = %next, "lifecycle state");
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use tempfile::TempDir;

    use apsnare_core::{Band, NetworkPlan, PortalTheme, RadioProfile, Role};

    use super::*;
    use crate::host::testing::RecordingRunner;

    fn write_script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path.display().to_string()
    }

    fn seed_theme(theme_root: &Path, dual: bool) {
        let dir = theme_root.join("Default");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("index.html"), "<html></html>").unwrap();
        fs::write(dir.join("save.php"), "<?php ?>").unwrap();
        if dual {
            let dual_dir = dir.join("Dual");
            fs::create_dir_all(&dual_dir).unwrap();
            fs::write(dual_dir.join("index.html"), "<html></html>").unwrap();
            fs::write(dual_dir.join("save.php"), "<?php ?>").unwrap();
        }
    }

    struct Fixture {
        _tmp: TempDir,
        paths: HostPaths,
        runner: Arc<RecordingRunner>,
    }

    fn fixture(dnsmasq_body: &str, hostapd_body: &str, dual: bool) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        seed_theme(&root.join("themes"), dual);
        fs::create_dir_all(root.join("log")).unwrap();
        fs::write(root.join("ip_forward"), "0\n").unwrap();

        let paths = HostPaths {
            conf_dir: root.join("conf"),
            web_root: root.join("www/captive"),
            web_root_dual: root.join("www/captive_dual"),
            sites_available: root.join("sites-available"),
            theme_root: root.join("themes"),
            portal_log: root.join("log/portal.log"),
            portal_log_dual: root.join("log/portal-dual.log"),
            ip_forward: root.join("ip_forward"),
            dnsmasq_bin: write_script(root, "fake-dnsmasq", dnsmasq_body),
            hostapd_bin: write_script(root, "fake-hostapd", hostapd_body),
            ..HostPaths::default()
        };

        Fixture {
            _tmp: tmp,
            paths,
            runner: Arc::new(RecordingRunner::new()),
        }
    }

    fn single_config() -> RunConfig {
        RunConfig::single(
            NetworkPlan::from_cidr("192.168.50.0/24").unwrap(),
            RadioProfile::new("wlan0", Band::Ghz24, 6, "Free_WiFi", Role::Primary).unwrap(),
            PortalTheme::Default,
        )
    }

    fn dual_config() -> RunConfig {
        RunConfig::dual(
            NetworkPlan::from_cidr("192.168.50.0/24").unwrap(),
            RadioProfile::new("wlan0", Band::Ghz24, 1, "Free_WiFi", Role::Primary).unwrap(),
            RadioProfile::new("wlan1", Band::Ghz5, 36, "Free_WiFi", Role::Secondary).unwrap(),
            PortalTheme::Default,
        )
        .unwrap()
    }

    fn controller(fixture: &Fixture, config: RunConfig) -> LifecycleController {
        LifecycleController::new(
            config,
            fixture.paths.clone(),
            fixture.runner.clone(),
            ProcessSupervisor::with_timings(Duration::from_millis(80), Duration::from_millis(300)),
        )
    }

    #[tokio::test]
    async fn single_mode_setup_and_teardown() {
        let fixture = fixture("sleep 30", "sleep 30", false);
        let controller = controller(&fixture, single_config());

        controller.setup().await.unwrap();
        assert_eq!(controller.state(), LifecycleState::Running);
        assert!(fixture.paths.dnsmasq_conf().is_file());
        assert!(fixture.paths.hostapd_conf(Band::Ghz24).is_file());
        assert!(fixture.paths.web_root.join("index.html").is_file());
        assert_eq!(fs::read_to_string(&fixture.paths.ip_forward).unwrap(), "1");
        assert_eq!(controller.supervisor.len(), 2);

        controller.teardown().await;
        assert_eq!(controller.state(), LifecycleState::Stopped);
        assert!(controller.supervisor.is_empty());
        assert!(!fixture.paths.dnsmasq_conf().exists());
        assert!(!fixture.paths.web_root.exists());
        assert!(!fixture.paths.portal_log.exists());
        assert_eq!(fs::read_to_string(&fixture.paths.ip_forward).unwrap(), "0");
        // interface handed back
        assert_eq!(fixture.runner.count_matching("ip addr flush dev wlan0"), 2);
    }

    #[tokio::test]
    async fn dnsmasq_crash_rolls_back_everything() {
        let fixture = fixture("echo 'cannot bind to port 53' >&2; exit 1", "sleep 30", false);
        let controller = controller(&fixture, single_config());

        let err = controller.setup().await.unwrap_err();
        match err {
            Error::Setup { stage, cause } => {
                assert_eq!(stage, SetupStage::ProcessStart);
                assert!(cause.to_string().contains("cannot bind"), "got: {cause}");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(controller.state(), LifecycleState::Stopped);
        assert!(controller.supervisor.is_empty());

        // every applied rule was deleted, in reverse order
        let commands = fixture.runner.recorded();
        let adds: Vec<_> = commands.iter().filter(|c| c.contains(" -A ")).collect();
        let dels: Vec<_> = commands.iter().filter(|c| c.contains(" -D ")).collect();
        assert_eq!(adds.len(), 3);
        assert_eq!(dels.len(), 3);
        for (add, del) in adds.iter().zip(dels.iter().rev()) {
            assert_eq!(add.replace(" -A ", " -D "), **del);
        }

        // forwarding restored to its prior value
        assert_eq!(fs::read_to_string(&fixture.paths.ip_forward).unwrap(), "0");
        // generated configs removed
        assert!(!fixture.paths.dnsmasq_conf().exists());
    }

    #[tokio::test]
    async fn ap_daemon_crash_undoes_only_what_was_applied() {
        let fixture = fixture("sleep 30", "echo 'driver init failed'; exit 1", false);
        let controller = controller(&fixture, single_config());

        let err = controller.setup().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Setup { stage: SetupStage::ProcessStart, .. }
        ));

        // the dns/dhcp daemon that did start was terminated again
        assert!(controller.supervisor.is_empty());
        assert_eq!(controller.state(), LifecycleState::Stopped);
        assert_eq!(fixture.runner.count_matching(" -D "), 3);
    }

    #[tokio::test]
    async fn interface_failure_stops_before_configs() {
        let fixture = fixture("sleep 30", "sleep 30", false);
        fixture.runner.fail_matching("addr add");
        let controller = controller(&fixture, single_config());

        let err = controller.setup().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Setup { stage: SetupStage::InterfaceConfig, .. }
        ));
        // nothing past the failing stage ran
        assert!(!fixture.paths.dnsmasq_conf().exists());
        assert_eq!(fixture.runner.count_matching("a2ensite"), 0);
        assert_eq!(fixture.runner.count_matching(" -A "), 0);
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let fixture = fixture("sleep 30", "sleep 30", false);
        let controller = controller(&fixture, single_config());
        controller.setup().await.unwrap();

        controller.teardown().await;
        let commands_after_first = fixture.runner.recorded().len();

        controller.teardown().await;
        assert_eq!(fixture.runner.recorded().len(), commands_after_first);
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn concurrent_teardowns_execute_once() {
        let fixture = fixture("sleep 30", "sleep 30", false);
        let controller = Arc::new(controller(&fixture, single_config()));
        controller.setup().await.unwrap();

        let a = {
            let c = Arc::clone(&controller);
            tokio::spawn(async move { c.teardown().await })
        };
        let b = {
            let c = Arc::clone(&controller);
            tokio::spawn(async move { c.teardown().await })
        };
        a.await.unwrap();
        b.await.unwrap();

        // exactly one full teardown's worth of rule deletions
        assert_eq!(fixture.runner.count_matching(" -D "), 3);
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn dual_mode_runs_three_daemons() {
        let fixture = fixture("sleep 30", "sleep 30", true);
        let controller = controller(&fixture, dual_config());

        controller.setup().await.unwrap();
        assert_eq!(controller.supervisor.len(), 3);
        assert!(fixture.paths.hostapd_conf(Band::Ghz24).is_file());
        assert!(fixture.paths.hostapd_conf(Band::Ghz5).is_file());

        let dnsmasq_conf = fs::read_to_string(fixture.paths.dnsmasq_conf()).unwrap();
        assert!(dnsmasq_conf.contains("interface=wlan0"));
        assert!(dnsmasq_conf.contains("interface=wlan1"));
        assert!(dnsmasq_conf.contains("dhcp-range=wlan0,"));
        assert!(dnsmasq_conf.contains("dhcp-range=wlan1,"));

        // six rules applied: three per interface
        assert_eq!(fixture.runner.count_matching(" -A "), 6);

        controller.teardown().await;
        assert_eq!(fixture.runner.count_matching(" -D "), 6);
        assert!(!fixture.paths.web_root_dual.exists());
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn second_setup_is_refused() {
        let fixture = fixture("sleep 30", "sleep 30", false);
        let controller = controller(&fixture, single_config());
        controller.setup().await.unwrap();

        assert!(matches!(
            controller.setup().await,
            Err(Error::NotIdle(LifecycleState::Running))
        ));
        controller.teardown().await;
    }

    #[tokio::test]
    async fn missing_dependency_aborts_before_mutation() {
        let fixture = fixture("sleep 30", "sleep 30", false);
        fixture.runner.fail_matching("which iptables");
        let controller = controller(&fixture, single_config());

        let err = controller.setup().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Setup { stage: SetupStage::Dependencies, .. }
        ));
        // no mutation was attempted
        assert_eq!(fixture.runner.count_matching("ip link"), 0);
        assert_eq!(fixture.runner.count_matching("systemctl stop"), 0);
    }
}
