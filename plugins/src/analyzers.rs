//! Built-in analyzers.

use vortex_common::network::host::HostResult;

use crate::{Analyzer, Finding, Severity};

const RDP_PORT: u16 = 3389;

/// Flags Remote Desktop exposed on its standard port.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenRdp;

impl Analyzer for OpenRdp {
    fn name(&self) -> &str {
        "open-rdp"
    }

    fn analyze(&self, host: &HostResult) -> Vec<Finding> {
        if !host.open_ports.contains(&RDP_PORT) {
            return Vec::new();
        }
        vec![Finding::on_port(
            host,
            RDP_PORT,
            Severity::Medium,
            "Open RDP port",
            format!("Remote Desktop is reachable on {}", host.display_name()),
        )]
    }
}

/// Services that carry credentials in clear text.
const CLEARTEXT: &[(u16, &str, Severity)] = &[
    (21, "FTP", Severity::Medium),
    (23, "Telnet", Severity::High),
    (110, "POP3", Severity::Low),
    (143, "IMAP", Severity::Low),
];

#[derive(Debug, Default, Clone, Copy)]
pub struct CleartextProtocols;

impl Analyzer for CleartextProtocols {
    fn name(&self) -> &str {
        "cleartext-protocols"
    }

    fn analyze(&self, host: &HostResult) -> Vec<Finding> {
        CLEARTEXT
            .iter()
            .filter(|(port, _, _)| host.open_ports.contains(port))
            .map(|&(port, service, severity)| {
                Finding::on_port(
                    host,
                    port,
                    severity,
                    format!("{service} exposed"),
                    format!("{service} transmits credentials without encryption"),
                )
            })
            .collect()
    }
}

/// Banner prefixes that reveal a product and its version.
const DISCLOSING_PREFIXES: &[&str] = &["SSH-", "220 ", "Server:", "HTTP/"];

/// Reports banners that name software together with a version number.
#[derive(Debug, Default, Clone, Copy)]
pub struct VersionDisclosure;

impl VersionDisclosure {
    fn disclosed(banner: &str) -> Option<&str> {
        let line = banner.lines().next()?.trim();
        let looks_versioned = line.chars().any(|c| c.is_ascii_digit())
            && (line.contains('/') || line.contains('_') || line.contains('-'));
        let known = DISCLOSING_PREFIXES.iter().any(|p| line.starts_with(p));
        (known && looks_versioned).then_some(line)
    }
}

impl Analyzer for VersionDisclosure {
    fn name(&self) -> &str {
        "version-disclosure"
    }

    fn analyze(&self, host: &HostResult) -> Vec<Finding> {
        host.banners
            .iter()
            .filter_map(|(&port, banner)| {
                let line = Self::disclosed(banner)?;
                Some(Finding::on_port(
                    host,
                    port,
                    Severity::Info,
                    "Service version disclosed",
                    line.to_string(),
                ))
            })
            .collect()
    }
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

    fn host(ports: &[u16]) -> HostResult {
        let mut host = HostResult::new("192.168.1.20".parse().unwrap());
        host.alive = true;
        for &port in ports {
            host.mark_open(port);
        }
        host
    }

    #[test]
    fn rdp_is_flagged_only_when_open() {
        assert!(OpenRdp.analyze(&host(&[22, 80])).is_empty());

        let findings = OpenRdp.analyze(&host(&[3389]));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].port, Some(3389));
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[test]
    fn telnet_outranks_ftp() {
        let findings = CleartextProtocols.analyze(&host(&[21, 23, 443]));
        assert_eq!(findings.len(), 2);
        let telnet = findings.iter().find(|f| f.port == Some(23)).unwrap();
        assert_eq!(telnet.severity, Severity::High);
    }

    #[test]
    fn versioned_banners_are_reported() {
        let mut target = host(&[22, 80, 9000]);
        target.insert_banner(22, "SSH-2.0-OpenSSH_9.6p1 Ubuntu-3\r\n".into());
        target.insert_banner(80, String::new());
        target.insert_banner(9000, "hello".into());

        let findings = VersionDisclosure.analyze(&target);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].port, Some(22));
        assert_eq!(findings[0].detail, "SSH-2.0-OpenSSH_9.6p1 Ubuntu-3");
    }
}
