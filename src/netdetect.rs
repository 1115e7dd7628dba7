use anyhow::{bail, Context, Result};
use ipnet::{IpNet, Ipv4Net};
use std::net::{IpAddr, Ipv4Addr};

/// Largest block the connect sweep will expand (a /16).
pub const MAX_EXPANDED_HOSTS: usize = 65_536;

/// Parse a scope entry as a CIDR block. A bare address is treated as a single host.
pub fn parse_range(s: &str) -> Result<IpNet> {
    let s = s.trim();
    if s.contains('/') {
        s.parse::<IpNet>()
            .with_context(|| format!("invalid CIDR: {s}"))
    } else {
        let ip: IpAddr = s.parse().with_context(|| format!("invalid IP: {s}"))?;
        Ok(IpNet::from(ip))
    }
}

/// Expand a CIDR into individual IP addresses suitable for host scanning.
///
/// For IPv4 blocks larger than /31, excludes the network and broadcast
/// addresses. /31 and /32 yield every address. IPv6 is only expanded for a
/// single /128 host.
pub fn expand_cidr_to_ips(cidr: IpNet) -> Vec<IpAddr> {
    match cidr {
        IpNet::V4(n4) => expand_ipv4net_hosts(n4)
            .into_iter()
            .map(IpAddr::V4)
            .collect(),
        IpNet::V6(n6) if n6.prefix_len() == 128 => vec![IpAddr::V6(n6.addr())],
        IpNet::V6(_) => Vec::new(),
    }
}

/// Parse and expand a scope entry, refusing blocks above [`MAX_EXPANDED_HOSTS`].
pub fn expand_range(s: &str) -> Result<Vec<IpAddr>> {
    let net = parse_range(s)?;
    if let IpNet::V4(n4) = net {
        let size = 1usize << (32 - u32::from(n4.prefix_len()));
        if size > MAX_EXPANDED_HOSTS {
            bail!("range {s} has {size} addresses, limit is {MAX_EXPANDED_HOSTS}");
        }
    }
    Ok(expand_cidr_to_ips(net))
}

fn expand_ipv4net_hosts(net: Ipv4Net) -> Vec<Ipv4Addr> {
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    if net.prefix_len() >= 31 {
        return (start..=end).map(Ipv4Addr::from).collect();
    }
    (start + 1..end).map(Ipv4Addr::from).collect()
}
