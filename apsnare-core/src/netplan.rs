//! Network plan derivation
//!
//! Turns a CIDR block into the addressing scheme a run needs: the gateway
//! (first usable host, also serving as DNS and portal address), and a DHCP
//! range that always sits strictly between the gateway and the broadcast
//! address.

use std::fmt;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

use crate::{Error, Result};

/// Blocks with fewer usable hosts than this cannot host a gateway plus a
/// meaningful DHCP range and are rejected outright.
pub const MIN_USABLE_HOSTS: u64 = 16;

/// Blocks at least this large get the fixed `.10`–`.100` lease window.
const LARGE_BLOCK_HOSTS: u64 = 110;

/// DHCP lease duration handed to every client
pub const DHCP_LEASE_TIME: &str = "12h";

/// Addressing plan derived from a CIDR block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkPlan {
    network: Ipv4Network,
    gateway: Ipv4Addr,
    dhcp_start: Ipv4Addr,
    dhcp_end: Ipv4Addr,
}

impl NetworkPlan {
    /// Derive a plan from a CIDR string such as `192.168.50.0/24`.
    ///
    /// Host bits in the input are tolerated and masked off. The gateway is
    /// the first usable host. Large blocks use network+10..network+100 as
    /// the DHCP range; smaller ones scale the range down while keeping
    /// `gateway < dhcp_start < dhcp_end < broadcast`.
    pub fn from_cidr(cidr: &str) -> Result<Self> {
        let parsed: Ipv4Network = cidr
            .parse()
            .map_err(|e| Error::NetworkPlan(format!("{cidr}: {e}")))?;
        let network = Ipv4Network::new(parsed.network(), parsed.prefix())
            .map_err(|e| Error::NetworkPlan(e.to_string()))?;

        let usable = usable_hosts(network.prefix());
        if usable < MIN_USABLE_HOSTS {
            return Err(Error::NetworkPlan(format!(
                "{network} has only {usable} usable hosts, need at least {MIN_USABLE_HOSTS}"
            )));
        }

        let base = u32::from(network.network());
        let broadcast = u32::from(network.broadcast());
        let gateway = Ipv4Addr::from(base + 1);
        let (dhcp_start, dhcp_end) = if usable >= LARGE_BLOCK_HOSTS {
            (base + 10, base + 100)
        } else {
            (base + 4, broadcast - 2)
        };

        Ok(Self {
            network,
            gateway,
            dhcp_start: Ipv4Addr::from(dhcp_start),
            dhcp_end: Ipv4Addr::from(dhcp_end),
        })
    }

    /// The normalized network block
    pub fn network(&self) -> Ipv4Network {
        self.network
    }

    /// Gateway address (first usable host); also the DNS sinkhole target
    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    /// First DHCP lease address
    pub fn dhcp_start(&self) -> Ipv4Addr {
        self.dhcp_start
    }

    /// Last DHCP lease address
    pub fn dhcp_end(&self) -> Ipv4Addr {
        self.dhcp_end
    }

    /// Broadcast address of the block
    pub fn broadcast(&self) -> Ipv4Addr {
        self.network.broadcast()
    }

    /// Prefix length of the block
    pub fn prefix(&self) -> u8 {
        self.network.prefix()
    }

    /// Gateway in `addr/prefix` form, as handed to `ip addr add`
    pub fn gateway_cidr(&self) -> String {
        format!("{}/{}", self.gateway, self.network.prefix())
    }
}

impl fmt::Display for NetworkPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (gateway {}, dhcp {}-{})",
            self.network, self.gateway, self.dhcp_start, self.dhcp_end
        )
    }
}

fn usable_hosts(prefix: u8) -> u64 {
    if prefix >= 31 {
        return 0;
    }
    (1u64 << (32 - u32::from(prefix))) - 2
}
