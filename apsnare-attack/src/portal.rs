//! Portal binding
//!
//! Stages the selected theme's assets into the web root(s), prepares the
//! credential log files, and renders/activates the virtual host
//! definitions on the external web server. Teardown restores the default
//! site and removes everything this module put on the host.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use apsnare_core::{Error, PortalTheme, Result, RunMode, VhostFlavor};

use crate::host::CommandRunner;
use crate::paths::HostPaths;

/// Platform connectivity-check paths aliased to the portal index
pub const CONNECTIVITY_PATHS: [&str; 3] =
    ["/hotspot-detect.html", "/generate_204", "/connecttest.txt"];

pub struct PortalBinder {
    runner: Arc<dyn CommandRunner>,
    paths: HostPaths,
}

impl PortalBinder {
    pub fn new(runner: Arc<dyn CommandRunner>, paths: HostPaths) -> Self {
        Self { runner, paths }
    }

    /// Start the web server and enable the modules the vhosts rely on.
    pub fn prepare_web_server(&self) -> Result<()> {
        self.runner.run(&["systemctl", "start", "apache2"])?;
        self.runner.run(&["a2enmod", "rewrite"])?;
        self.runner.run(&["a2enmod", "headers"])?;
        self.runner.run(&["systemctl", "restart", "apache2"])?;
        Ok(())
    }

    /// Bind `theme` for `mode`: stage assets, prepare the credential logs,
    /// write and activate the vhost definition(s).
    pub fn bind(&self, theme: PortalTheme, mode: RunMode) -> Result<()> {
        let source = self.paths.theme_root.join(theme.source_dir());
        self.stage_assets(theme, &source, &self.paths.web_root)?;
        if mode == RunMode::Dual {
            self.stage_assets(theme, &source.join("Dual"), &self.paths.web_root_dual)?;
        }

        self.prepare_log(&self.paths.portal_log)?;
        if mode == RunMode::Dual {
            self.prepare_log(&self.paths.portal_log_dual)?;
        }

        self.activate_vhosts(theme, mode)
    }

    /// Stop serving the portal and restore the default site. Best-effort:
    /// every step is attempted, failures are logged.
    pub fn unbind(&self, mode: RunMode) {
        let mut sites = vec![self.paths.vhost_site.as_str()];
        if mode == RunMode::Dual {
            sites.push(self.paths.vhost_site_dual.as_str());
        }

        crate::host::systemctl(self.runner.as_ref(), "stop", "apache2");
        for site in &sites {
            if let Err(e) = self.runner.run(&["a2dissite", site]) {
                warn!(site = %site, error = %e, "could not disable portal site");
            }
        }
        if let Err(e) = self.runner.run(&["a2ensite", &self.paths.default_site]) {
            warn!(error = %e, "could not re-enable default site");
        }
        crate::host::systemctl(self.runner.as_ref(), "start", "apache2");
        crate::host::systemctl(self.runner.as_ref(), "reload", "apache2");

        let mut vhost_files = vec![self.paths.vhost_path()];
        if mode == RunMode::Dual {
            vhost_files.push(self.paths.vhost_path_dual());
        }
        for file in vhost_files {
            remove_file_quietly(&file);
        }
        info!("portal unbound, default site restored");
    }

    /// Delete the portal web root(s). Best-effort.
    pub fn remove_web_roots(&self, mode: RunMode) {
        let mut roots = vec![&self.paths.web_root];
        if mode == RunMode::Dual {
            roots.push(&self.paths.web_root_dual);
        }
        for root in roots {
            match fs::remove_dir_all(root) {
                Ok(()) => info!(root = %root.display(), "removed portal web root"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(root = %root.display(), error = %e, "could not remove web root"),
            }
        }
    }

    /// Show captured submissions to the operator, then delete the log
    /// file(s). Best-effort.
    pub fn collect_logs(&self, mode: RunMode) {
        let mut logs = vec![&self.paths.portal_log];
        if mode == RunMode::Dual {
            logs.push(&self.paths.portal_log_dual);
        }
        for log in logs {
            match fs::read_to_string(log) {
                Ok(content) if content.trim().is_empty() => {
                    info!(log = %log.display(), "portal log is empty");
                }
                Ok(content) => {
                    info!(log = %log.display(), "captured portal submissions:\n{}", content.trim());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => warn!(log = %log.display(), error = %e, "could not read portal log"),
            }
            remove_file_quietly(log);
        }
    }

    fn stage_assets(&self, theme: PortalTheme, source: &Path, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest).map_err(|e| Error::ConfigWrite {
            path: dest.to_path_buf(),
            cause: e.to_string(),
        })?;
        for asset in theme.assets() {
            let from = source.join(asset);
            if !from.is_file() {
                return Err(Error::ThemeAssetMissing(from));
            }
            let to = dest.join(asset);
            fs::copy(&from, &to).map_err(|e| Error::ConfigWrite {
                path: to.clone(),
                cause: e.to_string(),
            })?;
        }
        info!(theme = %theme, root = %dest.display(), "portal assets staged");
        Ok(())
    }

    /// Create the credential log owned by the web service account with
    /// owner/group-only read access.
    fn prepare_log(&self, path: &Path) -> Result<()> {
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::ConfigWrite {
                path: path.to_path_buf(),
                cause: e.to_string(),
            })?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o640)).map_err(|e| {
            Error::ConfigWrite {
                path: path.to_path_buf(),
                cause: e.to_string(),
            }
        })?;

        match nix::unistd::User::from_name(&self.paths.web_user) {
            Ok(Some(user)) => {
                if let Err(e) = nix::unistd::chown(path, Some(user.uid), Some(user.gid)) {
                    warn!(log = %path.display(), error = %e, "could not chown portal log");
                }
            }
            _ => warn!(
                user = %self.paths.web_user,
                "web service account not found, leaving log ownership unchanged"
            ),
        }
        info!(log = %path.display(), "portal log ready");
        Ok(())
    }

    fn activate_vhosts(&self, theme: PortalTheme, mode: RunMode) -> Result<()> {
        write_vhost(&self.paths.vhost_path(), theme, &self.paths.web_root)?;
        if mode == RunMode::Dual {
            write_vhost(&self.paths.vhost_path_dual(), theme, &self.paths.web_root_dual)?;
        }

        self.runner.run(&["a2ensite", &self.paths.vhost_site])?;
        if mode == RunMode::Dual {
            self.runner.run(&["a2ensite", &self.paths.vhost_site_dual])?;
        }
        // lab hosts without the stock default site are fine
        if let Err(e) = self.runner.run(&["a2dissite", &self.paths.default_site]) {
            warn!(error = %e, "could not disable default site");
        }
        self.runner.run(&["systemctl", "reload", "apache2"])?;
        info!(theme = %theme, mode = %mode, "portal vhosts active");
        Ok(())
    }
}

fn write_vhost(path: &Path, theme: PortalTheme, web_root: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::ConfigWrite {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
    }
    fs::write(path, render_vhost(theme, web_root)).map_err(|e| Error::ConfigWrite {
        path: path.to_path_buf(),
        cause: e.to_string(),
    })?;
    info!(vhost = %path.display(), "wrote vhost definition");
    Ok(())
}

/// Render the vhost definition for `theme` rooted at `web_root`.
pub fn render_vhost(theme: PortalTheme, web_root: &Path) -> String {
    let root = web_root.display();
    let mut out = String::new();

    out.push_str("<VirtualHost *:80>\n");
    out.push_str("    ServerName captive.portal\n");
    out.push_str("    ServerAlias *\n");
    out.push_str(&format!("    DocumentRoot {root}\n\n"));

    match theme.vhost_flavor() {
        VhostFlavor::Basic => {
            out.push_str(&format!("    <Directory {root}>\n"));
            out.push_str("        AllowOverride All\n");
            out.push_str("        Require all granted\n");
            out.push_str("    </Directory>\n\n");
        }
        VhostFlavor::Rich => {
            out.push_str(&format!("    <Directory {root}>\n"));
            out.push_str("        AllowOverride None\n");
            out.push_str("        Require all granted\n");
            out.push_str("        Options -MultiViews\n");
            out.push_str("    </Directory>\n\n");
        }
    }

    for check_path in CONNECTIVITY_PATHS {
        out.push_str(&format!("    Alias {check_path} {root}/index.html\n"));
    }
    out.push('\n');
    out.push_str("    RewriteEngine On\n");

    match theme.vhost_flavor() {
        VhostFlavor::Basic => {
            out.push_str(&format!(
                "    RewriteCond %{{REQUEST_URI}} !^/({})$\n",
                pattern_group(theme.submission_endpoints())
            ));
            out.push_str("    RewriteRule ^.*$ /index.html [L]\n\n");
        }
        VhostFlavor::Rich => {
            out.push_str(&format!(
                "    RewriteCond %{{REQUEST_URI}} !^/({})$\n",
                pattern_group(&connectivity_names())
            ));
            out.push_str(&format!(
                "    RewriteRule ^/?({})$ - [L,NC]\n",
                pattern_group(&passthrough_files(theme))
            ));
            out.push_str("    RewriteCond %{REQUEST_FILENAME} -f [OR]\n");
            out.push_str("    RewriteCond %{REQUEST_FILENAME} -d\n");
            out.push_str("    RewriteRule ^ - [L]\n");
            out.push_str(
                "    RewriteRule \\.(?:css|js|png|jpe?g|gif|ico|svg|webp|woff2?|ttf|eot|map)$ - [L,NC]\n",
            );
            out.push_str("    RewriteRule ^ /index.html [L]\n\n");
        }
    }

    out.push_str(
        "    Header always set Cache-Control \"no-store, no-cache, must-revalidate, max-age=0\"\n",
    );
    out.push_str("    Header always set Pragma \"no-cache\"\n");
    out.push_str("    Header always set Expires \"0\"\n");

    if theme.vhost_flavor() == VhostFlavor::Rich {
        out.push_str("    Header always set X-VHost \"captive-portal\"\n\n");
        out.push_str("    AddType image/svg+xml .svg .svgz\n");
    }

    out.push_str("</VirtualHost>\n");
    out
}

/// Files a rich vhost must pass through untouched: the theme's submission
/// endpoints plus its non-index assets.
fn passthrough_files(theme: PortalTheme) -> Vec<String> {
    let mut files: Vec<String> = theme
        .submission_endpoints()
        .iter()
        .map(|s| s.to_string())
        .collect();
    for asset in theme.assets() {
        if *asset != "index.html" && !files.iter().any(|f| f == asset) {
            files.push(asset.to_string());
        }
    }
    files
}

fn connectivity_names() -> Vec<String> {
    CONNECTIVITY_PATHS
        .iter()
        .map(|p| p.trim_start_matches('/').to_string())
        .collect()
}

fn pattern_group<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|n| n.as_ref().replace('.', "\\."))
        .collect::<Vec<_>>()
        .join("|")
}

fn remove_file_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => info!(file = %path.display(), "removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(file = %path.display(), error = %e, "could not remove file"),
    }
}
