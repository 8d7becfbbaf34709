//! Radio profiles: band, channel, SSID and role of one wireless interface

use std::fmt;

use crate::{Error, Result};

/// 5 GHz channels usable without DFS radar detection
pub const CHANNELS_5GHZ_NON_DFS: [u8; 9] = [36, 40, 44, 48, 149, 153, 157, 161, 165];

/// WiFi band of a radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    /// 2.4 GHz (802.11g)
    Ghz24,
    /// 5 GHz (802.11a), non-DFS channels only
    Ghz5,
}

impl Band {
    /// `hw_mode` value expected by the AP daemon
    pub fn hw_mode(&self) -> &'static str {
        match self {
            Band::Ghz24 => "g",
            Band::Ghz5 => "a",
        }
    }

    /// Whether WMM is enabled for this band (required for usable 5 GHz rates)
    pub fn wmm_enabled(&self) -> u8 {
        match self {
            Band::Ghz24 => 0,
            Band::Ghz5 => 1,
        }
    }

    /// Channel used when the operator does not pick one
    pub fn default_channel(&self) -> u8 {
        match self {
            Band::Ghz24 => 6,
            Band::Ghz5 => 36,
        }
    }

    /// Is `channel` legal on this band?
    pub fn channel_is_legal(&self, channel: u8) -> bool {
        match self {
            Band::Ghz24 => (1..=13).contains(&channel),
            Band::Ghz5 => CHANNELS_5GHZ_NON_DFS.contains(&channel),
        }
    }

    /// Short suffix distinguishing per-band generated files
    pub fn config_suffix(&self) -> &'static str {
        match self {
            Band::Ghz24 => "24",
            Band::Ghz5 => "5",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Band::Ghz24 => write!(f, "2.4GHz"),
            Band::Ghz5 => write!(f, "5GHz"),
        }
    }
}

/// Role of a radio within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Secondary,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Secondary => write!(f, "secondary"),
        }
    }
}

/// One wireless interface's band, channel, SSID and role within a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioProfile {
    pub interface: String,
    pub band: Band,
    pub channel: u8,
    pub ssid: String,
    pub role: Role,
}

impl RadioProfile {
    /// Build a validated profile.
    pub fn new(
        interface: impl Into<String>,
        band: Band,
        channel: u8,
        ssid: impl Into<String>,
        role: Role,
    ) -> Result<Self> {
        let interface = interface.into();
        let ssid = ssid.into();

        if interface.is_empty() {
            return Err(Error::RadioProfile("interface name is empty".to_string()));
        }
        if ssid.is_empty() || ssid.len() > 32 {
            return Err(Error::RadioProfile(format!(
                "ssid '{ssid}' must be 1-32 bytes"
            )));
        }
        if !band.channel_is_legal(channel) {
            return Err(Error::RadioProfile(match band {
                Band::Ghz24 => format!("channel {channel} invalid for 2.4GHz, use 1-13"),
                Band::Ghz5 => format!(
                    "channel {channel} invalid for 5GHz, use one of {CHANNELS_5GHZ_NON_DFS:?}"
                ),
            }));
        }

        Ok(Self {
            interface,
            band,
            channel,
            ssid,
            role,
        })
    }
}

impl fmt::Display for RadioProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} ch {}, ssid '{}', {})",
            self.interface, self.band, self.channel, self.ssid, self.role
        )
    }
}
