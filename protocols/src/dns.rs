use std::net::IpAddr;

use anyhow::{Context, ensure};
use dns_parser::{Builder, Packet, QueryClass, QueryType, RData, ResponseCode};

/// Builds a recursive PTR query for `ip_addr` with transaction id `id`.
pub fn create_ptr_packet(ip_addr: &IpAddr, id: u16) -> anyhow::Result<Vec<u8>> {
    let ptr_name: String = reverse_address_to_ptr(ip_addr);
    let mut builder = Builder::new_query(id, true);
    builder.add_question(&ptr_name, false, QueryType::PTR, QueryClass::IN);
    builder
        .build()
        .map_err(|_| anyhow::anyhow!("PTR query for {ip_addr} does not fit a single datagram"))
}

/// Extracts the transaction id and the first PTR target from a DNS response.
pub fn get_hostname(payload: &[u8]) -> anyhow::Result<(u16, String)> {
    let packet = Packet::parse(payload).context("Failed to parse DNS packet")?;
    let transaction_id: u16 = packet.header.id;
    ensure!(!packet.header.query, "packet {transaction_id} is a query");
    ensure!(
        packet.header.response_code == ResponseCode::NoError,
        "lookup {transaction_id} failed: {:?}",
        packet.header.response_code
    );

    let hostname: String = packet
        .answers
        .iter()
        .find_map(|record| match &record.data {
            RData::PTR(ptr) => Some(ptr.0.to_string()),
            _ => None,
        })
        .ok_or_else(|| anyhow::anyhow!("No PTR record found"))?;

    Ok((transaction_id, hostname.trim_end_matches('.').to_string()))
}

/// `192.0.2.1` -> `1.2.0.192.in-addr.arpa`, IPv6 addresses expand to nibbles under `ip6.arpa`.
pub fn reverse_address_to_ptr(ip_addr: &IpAddr) -> String {
    match ip_addr {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{d}.{c}.{b}.{a}.in-addr.arpa")
        }
        IpAddr::V6(v6) => {
            let mut labels: Vec<String> = Vec::with_capacity(34);
            for byte in v6.octets().iter().rev() {
                labels.push(format!("{:x}", byte & 0x0f));
                labels.push(format!("{:x}", byte >> 4));
            }
            labels.push("ip6.arpa".to_string());
            labels.join(".")
        }
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
