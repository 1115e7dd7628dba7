use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Parse a port list into deduplicated TCP ports (1..=65535), first occurrence first.
///
/// Entries are single ports (`80`) or inclusive ranges (`8000-8010`), separated
/// by newlines, commas or whitespace, so both a ports file and an nmap-style
/// `22,80,443` list are accepted. `#` starts a comment that runs to end of line.
pub fn parse_ports_str(s: &str) -> Result<Vec<u16>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for (idx, line) in s.lines().enumerate() {
        let body = line.split_once('#').map_or(line, |(before, _)| before);
        for entry in body
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|e| !e.is_empty())
        {
            let (lo, hi) =
                parse_entry(entry).with_context(|| format!("line {}: {entry}", idx + 1))?;
            out.extend((lo..=hi).filter(|p| seen.insert(*p)));
        }
    }
    Ok(out)
}

fn parse_entry(entry: &str) -> Result<(u16, u16)> {
    let Some((a, b)) = entry.split_once('-') else {
        let p = parse_port_str(entry)?;
        return Ok((p, p));
    };
    let (lo, hi) = (parse_port_str(a)?, parse_port_str(b)?);
    if lo > hi {
        bail!("range {lo}-{hi} runs backwards");
    }
    Ok((lo, hi))
}

/// Load a ports list from a file path. Errors if the file cannot be read or parsed.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    parse_ports_str(&content)
}

/// Load the configured ports list, or the default list when none is configured.
///
/// A configured file that is missing or unparsable is logged and replaced by the defaults.
pub fn load_ports_or_default(path: Option<&Path>) -> Vec<u16> {
    let Some(path) = path else {
        return default_ports();
    };
    match load_ports_from_path(path) {
        Ok(v) if !v.is_empty() => v,
        Ok(_) => default_ports(),
        Err(e) => {
            warn!(error = %e, "falling back to default port list");
            default_ports()
        }
    }
}

/// A conservative default list of commonly used TCP ports.
/// Small enough for a connect sweep of a /24 to stay polite.
pub fn default_ports() -> Vec<u16> {
    const DEFAULT: &[u16] = &[
        21, 22, 23, 25, 53, 80, 110, 135, 139, 143, 389, 443, 445, 465, 587, 631, 636, 993, 995,
        1433, 1521, 1883, 2375, 3000, 3306, 3389, 5000, 5432, 5672, 5900, 5985, 5986, 6379, 8000,
        8008, 8080, 8081, 8443, 8888, 9000, 9200, 9443, 11211, 27017,
    ];
    DEFAULT.to_vec()
}

/// Well-known service name for a TCP port, in the vocabulary nmap uses.
///
/// Ports that speak TLS from the first byte map to `https` or `ssl/<proto>`.
pub fn service_name(port: u16) -> &'static str {
    match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 | 587 => "smtp",
        53 => "domain",
        80 | 8000 | 8008 | 8080 | 8081 | 8888 => "http",
        110 => "pop3",
        135 => "msrpc",
        139 => "netbios-ssn",
        143 => "imap",
        389 => "ldap",
        443 | 8443 | 9443 => "https",
        445 => "microsoft-ds",
        465 => "ssl/smtp",
        631 => "ipp",
        636 => "ssl/ldap",
        993 => "ssl/imap",
        995 => "ssl/pop3",
        1433 => "ms-sql-s",
        1521 => "oracle",
        1883 => "mqtt",
        2375 => "docker",
        3000 => "ppp",
        3306 => "mysql",
        3389 => "ms-wbt-server",
        5000 => "upnp",
        5432 => "postgresql",
        5672 => "amqp",
        5900 => "vnc",
        5985 => "wsman",
        5986 => "wsmans",
        6379 => "redis",
        9000 => "cslistener",
        9200 => "wap-wsp",
        11211 => "memcache",
        27017 => "mongod",
        _ => "unknown",
    }
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.trim().parse().with_context(|| format!("not a port number: {s:?}"))?;
    match u16::try_from(val) {
        Ok(p) if p != 0 => Ok(p),
        _ => bail!("port out of range: {val}"),
    }
}
