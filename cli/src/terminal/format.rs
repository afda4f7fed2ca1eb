use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv6Addr};
use std::time::Duration;

use colored::*;

use vortex_common::error::HostError;
use vortex_plugins::Finding;

use crate::terminal::colors;

pub type Detail = (String, ColoredString);

const BANNER_WIDTH: usize = 44;

pub fn ipv6_to_type_str(ipv6_addr: &Ipv6Addr) -> &'static str {
    let first_byte = ipv6_addr.octets()[0];
    if (0x20..=0x3F).contains(&first_byte) {
        return "GUA";
    }
    if ipv6_addr.is_unique_local() {
        return "ULA";
    }
    if ipv6_addr.is_unicast_link_local() {
        return "LLA";
    }
    "IPv6"
}

pub fn ip_to_detail(ip: &IpAddr) -> Detail {
    match ip {
        IpAddr::V4(ipv4_addr) => ("IPv4".to_string(), ipv4_addr.to_string().color(colors::IPV4_ADDR)),
        IpAddr::V6(ipv6_addr) => (
            ipv6_to_type_str(ipv6_addr).to_string(),
            ipv6_addr.to_string().color(colors::IPV6_ADDR),
        ),
    }
}

fn join_ports(ports: &BTreeSet<u16>) -> String {
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<String>>()
        .join(", ")
}

pub fn ports_to_detail(open: &BTreeSet<u16>) -> Option<Detail> {
    if open.is_empty() {
        return None;
    }
    Some(("Ports".to_string(), join_ports(open).color(colors::PORT)))
}

pub fn filtered_to_detail(filtered: &BTreeSet<u16>) -> Option<Detail> {
    if filtered.is_empty() {
        return None;
    }
    Some(("Filtered".to_string(), join_ports(filtered).dimmed()))
}

/// First printable line of each non-empty banner, shortened to fit the tree.
pub fn banners_to_details(banners: &BTreeMap<u16, String>) -> Vec<Detail> {
    banners
        .iter()
        .filter_map(|(port, banner)| {
            let line: String = banner
                .lines()
                .next()?
                .chars()
                .filter(|c| !c.is_control())
                .collect();
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let shown: String = if line.chars().count() > BANNER_WIDTH {
                let cut: String = line.chars().take(BANNER_WIDTH - 1).collect();
                format!("{cut}…")
            } else {
                line.to_string()
            };
            let value = format!("{} {}", format!("{port}").color(colors::PORT), shown.color(colors::BANNER));
            Some(("Banner".to_string(), value.normal()))
        })
        .collect()
}

pub fn finding_to_detail(finding: &Finding) -> Detail {
    let severity: ColoredString = format!("{}", finding.severity)
        .to_uppercase()
        .color(colors::severity(finding.severity))
        .bold();
    let value: String = format!("{} {}", severity, finding.title.color(colors::TEXT_DEFAULT));
    ("Finding".to_string(), value.normal())
}

pub fn error_to_detail(error: &HostError) -> Detail {
    ("Error".to_string(), error.to_string().red())
}

pub fn duration_to_detail(elapsed: Duration) -> Detail {
    ("Time".to_string(), format!("{:.2}s", elapsed.as_secs_f64()).dimmed())
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv6_kinds() {
        assert_eq!(ipv6_to_type_str(&"2001:db8::1".parse().unwrap()), "GUA");
        assert_eq!(ipv6_to_type_str(&"fd00::1".parse().unwrap()), "ULA");
        assert_eq!(ipv6_to_type_str(&"fe80::1".parse().unwrap()), "LLA");
        assert_eq!(ipv6_to_type_str(&"::1".parse().unwrap()), "IPv6");
    }

    #[test]
    fn empty_banners_are_not_listed() {
        colored::control::set_override(false);
        let banners = BTreeMap::from([
            (22, "SSH-2.0-OpenSSH_9.6\r\nmore".to_string()),
            (80, String::new()),
        ]);
        let details = banners_to_details(&banners);
        assert_eq!(details.len(), 1);
        assert!(details[0].1.to_string().contains("SSH-2.0-OpenSSH_9.6"));
    }

    #[test]
    fn long_banners_are_shortened() {
        colored::control::set_override(false);
        let banners = BTreeMap::from([(8080, "x".repeat(200))]);
        let details = banners_to_details(&banners);
        assert!(details[0].1.to_string().ends_with('…'));
    }
}
