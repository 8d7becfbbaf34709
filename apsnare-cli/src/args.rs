//! CLI argument parsing
//!
//! Two run modes: `single` (one radio on one band) and `dual` (2.4 GHz and
//! 5 GHz broadcast simultaneously from two radios).

use clap::{Parser, Subcommand, ValueEnum};

use apsnare_core::{
    Band, NetworkPlan, PortalTheme, RadioProfile, Result, Role, RunConfig,
};

#[derive(Parser, Debug)]
#[command(name = "apsnare")]
#[command(version, about = "Rogue AP and captive portal orchestrator for authorized lab testing", long_about = None)]
pub struct Cli {
    /// Verbose output (-v, -vv for increasing verbosity)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Single-radio access point with captive portal
    Single {
        /// Network block in CIDR form, e.g. 192.168.50.0/24
        #[arg(short, long)]
        network: String,

        /// SSID to broadcast
        #[arg(short, long)]
        ssid: String,

        /// Wireless interface hosting the AP
        #[arg(short, long, default_value = "wlan0")]
        interface: String,

        /// WiFi band
        #[arg(short, long, value_enum, default_value_t = BandArg::Ghz24)]
        band: BandArg,

        /// Channel; defaults to 6 on 2.4GHz and 36 on 5GHz
        #[arg(short, long)]
        channel: Option<u8>,

        /// Captive portal theme
        #[arg(short = 't', long, value_enum, default_value_t = ThemeArg::Default)]
        theme: ThemeArg,
    },

    /// Dual-radio access point: 2.4GHz and 5GHz at once
    Dual {
        /// Network block in CIDR form, shared by both radios
        #[arg(short, long)]
        network: String,

        /// SSID broadcast on both bands
        #[arg(short, long)]
        ssid: String,

        /// Interface bound to the 2.4GHz radio
        #[arg(long)]
        iface_24: String,

        /// 2.4GHz channel
        #[arg(long, default_value_t = 1)]
        channel_24: u8,

        /// Interface bound to the 5GHz radio
        #[arg(long)]
        iface_5: String,

        /// 5GHz channel (non-DFS)
        #[arg(long, default_value_t = 36)]
        channel_5: u8,

        /// Captive portal theme
        #[arg(short = 't', long, value_enum, default_value_t = ThemeArg::Default)]
        theme: ThemeArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BandArg {
    #[value(name = "2.4")]
    Ghz24,
    #[value(name = "5")]
    Ghz5,
}

impl From<BandArg> for Band {
    fn from(band: BandArg) -> Self {
        match band {
            BandArg::Ghz24 => Band::Ghz24,
            BandArg::Ghz5 => Band::Ghz5,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThemeArg {
    Default,
    Microsoft,
    Bezeq,
}

impl From<ThemeArg> for PortalTheme {
    fn from(theme: ThemeArg) -> Self {
        match theme {
            ThemeArg::Default => PortalTheme::Default,
            ThemeArg::Microsoft => PortalTheme::Microsoft,
            ThemeArg::Bezeq => PortalTheme::Bezeq,
        }
    }
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Commands {
    /// Resolve the parsed arguments into a validated run configuration.
    pub fn into_run_config(self) -> Result<RunConfig> {
        match self {
            Commands::Single {
                network,
                ssid,
                interface,
                band,
                channel,
                theme,
            } => {
                let plan = NetworkPlan::from_cidr(&network)?;
                let band = Band::from(band);
                let channel = channel.unwrap_or_else(|| band.default_channel());
                let radio = RadioProfile::new(interface, band, channel, ssid, Role::Primary)?;
                Ok(RunConfig::single(plan, radio, theme.into()))
            }
            Commands::Dual {
                network,
                ssid,
                iface_24,
                channel_24,
                iface_5,
                channel_5,
                theme,
            } => {
                let plan = NetworkPlan::from_cidr(&network)?;
                let radio_24 =
                    RadioProfile::new(iface_24, Band::Ghz24, channel_24, ssid.clone(), Role::Primary)?;
                let radio_5 =
                    RadioProfile::new(iface_5, Band::Ghz5, channel_5, ssid, Role::Secondary)?;
                RunConfig::dual(plan, radio_24, radio_5, theme.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apsnare_core::RunMode;

    #[test]
    fn parses_single_mode() {
        let cli = Cli::parse_from([
            "apsnare", "single", "--network", "192.168.50.0/24", "--ssid", "Free_WiFi",
            "--band", "5", "--channel", "40",
        ]);
        let config = cli.command.into_run_config().unwrap();
        assert_eq!(config.mode(), RunMode::Single);
        assert_eq!(config.radios[0].band, Band::Ghz5);
        assert_eq!(config.radios[0].channel, 40);
        assert_eq!(config.radios[0].interface, "wlan0");
    }

    #[test]
    fn channel_defaults_follow_band() {
        let cli = Cli::parse_from([
            "apsnare", "single", "--network", "192.168.50.0/24", "--ssid", "lab", "--band", "5",
        ]);
        let config = cli.command.into_run_config().unwrap();
        assert_eq!(config.radios[0].channel, 36);

        let cli = Cli::parse_from([
            "apsnare", "single", "--network", "192.168.50.0/24", "--ssid", "lab",
        ]);
        let config = cli.command.into_run_config().unwrap();
        assert_eq!(config.radios[0].channel, 6);
    }

    #[test]
    fn parses_dual_mode() {
        let cli = Cli::parse_from([
            "apsnare", "dual", "--network", "192.168.50.0/24", "--ssid", "Free_WiFi",
            "--iface-24", "wlan0", "--iface-5", "wlan1", "--theme", "microsoft",
        ]);
        let config = cli.command.into_run_config().unwrap();
        assert_eq!(config.mode(), RunMode::Dual);
        assert_eq!(config.radios.len(), 2);
        assert_eq!(config.radios[0].channel, 1);
        assert_eq!(config.radios[1].channel, 36);
        assert_eq!(config.theme, PortalTheme::Microsoft);
    }

    #[test]
    fn rejects_cross_band_channel() {
        let cli = Cli::parse_from([
            "apsnare", "single", "--network", "192.168.50.0/24", "--ssid", "lab",
            "--band", "2.4", "--channel", "36",
        ]);
        assert!(cli.command.into_run_config().is_err());
    }

    #[test]
    fn rejects_duplicate_dual_interfaces() {
        let cli = Cli::parse_from([
            "apsnare", "dual", "--network", "192.168.50.0/24", "--ssid", "lab",
            "--iface-24", "wlan0", "--iface-5", "wlan0",
        ]);
        assert!(cli.command.into_run_config().is_err());
    }

    #[test]
    fn rejects_tiny_networks() {
        let cli = Cli::parse_from([
            "apsnare", "single", "--network", "192.168.50.0/30", "--ssid", "lab",
        ]);
        assert!(cli.command.into_run_config().is_err());
    }
}
