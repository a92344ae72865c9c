//! `_hap._tcp` service advertisement.
//!
//! Builds the announcement packet for one accessory: PTR, SRV, TXT and A
//! records in the answer section, NSEC records in the additional section.

use crate::packet::{Packet, Record, RecordData, RecordType};
use crate::{MDNS_ADDR, MDNS_PORT};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hap_core::config::{AccessoryConfig, MdnsConfig};
use hap_core::device::DeviceId;
use hap_core::features::{Category, FeatureFlags, StatusFlags};
use sha2::{Digest, Sha512};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// DNS-SD service type for HAP over IP.
pub const HAP_SERVICE_TYPE: &str = "_hap._tcp.local.";

/// HAP protocol version advertised in `pv`.
pub const PROTOCOL_VERSION: &str = "1.1";

/// Everything needed to describe the accessory on the network.
#[derive(Debug, Clone)]
pub struct ServiceAdvertisement {
    pub name: String,
    pub device_id: DeviceId,
    pub model: String,
    pub category: Category,
    pub config_number: u32,
    pub features: FeatureFlags,
    pub setup_id: Option<String>,
    pub port: u16,
    pub address: Ipv4Addr,
    pub ttl: u32,
}

impl ServiceAdvertisement {
    /// Build from configuration. `port` is the bound TCP port.
    pub fn from_config(config: &AccessoryConfig, device_id: DeviceId, port: u16) -> Self {
        Self {
            name: config.name.clone(),
            device_id,
            model: config.model.clone(),
            category: config.category(),
            config_number: config.config_number,
            features: FeatureFlags::default(),
            setup_id: config.setup_id.clone(),
            port,
            address: resolve_address(&config.mdns),
            ttl: config.mdns.ttl,
        }
    }

    /// `<name>._hap._tcp.local.`
    pub fn instance_name(&self) -> String {
        format!("{}.{}", self.name, HAP_SERVICE_TYPE)
    }

    /// `<name>.local.` with characters outside `[A-Za-z0-9-]` replaced.
    pub fn host_name(&self) -> String {
        let host: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        format!("{}.local.", host.trim_matches('-'))
    }

    /// TXT entries for the given pairing status.
    pub fn txt_entries(&self, status: StatusFlags) -> Vec<String> {
        let mut entries = vec![
            format!("c#={}", self.config_number),
            format!("ff={}", self.features.raw()),
            format!("id={}", self.device_id.to_mac_string()),
            format!("md={}", self.model),
            format!("pv={}", PROTOCOL_VERSION),
            "s#=1".to_string(),
            format!("sf={}", status.raw()),
            format!("ci={}", self.category.raw()),
        ];
        if let Some(setup_id) = &self.setup_id {
            entries.push(format!("sh={}", setup_hash(setup_id, &self.device_id)));
        }
        entries
    }

    /// Full announcement packet.
    pub fn packet(&self, paired: bool) -> Packet {
        let instance = self.instance_name();
        let host = self.host_name();
        let status = StatusFlags::for_pairing(paired);

        let mut packet = Packet::response();
        packet.answers = vec![
            Record::shared(HAP_SERVICE_TYPE, self.ttl, RecordData::Ptr(instance.clone())),
            Record::unique(
                instance.clone(),
                self.ttl,
                RecordData::Srv {
                    priority: 0,
                    weight: 0,
                    port: self.port,
                    target: host.clone(),
                },
            ),
            Record::unique(
                instance.clone(),
                self.ttl,
                RecordData::Txt(self.txt_entries(status)),
            ),
            Record::unique(host.clone(), self.ttl, RecordData::A(self.address)),
        ];
        packet.additionals = vec![
            Record::unique(
                instance.clone(),
                self.ttl,
                RecordData::Nsec {
                    next_domain: instance,
                    types: vec![RecordType::TXT, RecordType::SRV],
                },
            ),
            Record::unique(
                host.clone(),
                self.ttl,
                RecordData::Nsec {
                    next_domain: host,
                    types: vec![RecordType::A],
                },
            ),
        ];
        packet
    }
}

/// `sh` TXT value: base64 of the first four bytes of
/// SHA-512(setup id ‖ device id).
pub fn setup_hash(setup_id: &str, device_id: &DeviceId) -> String {
    let mut hasher = Sha512::new();
    hasher.update(setup_id.as_bytes());
    hasher.update(device_id.to_mac_string().as_bytes());
    let digest = hasher.finalize();
    BASE64.encode(&digest[..4])
}

/// Address for the A record: explicit override, then the interface, then
/// whatever address the host routes multicast from.
pub fn resolve_address(config: &MdnsConfig) -> Ipv4Addr {
    if let Some(address) = config.address {
        return address;
    }
    if !config.interface.is_unspecified() {
        return config.interface;
    }
    outbound_ipv4().unwrap_or(Ipv4Addr::LOCALHOST)
}

fn outbound_ipv4() -> Option<Ipv4Addr> {
    let socket = std::net::UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).ok()?;
    socket.connect(SocketAddr::from((MDNS_ADDR, MDNS_PORT))).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(address) if !address.is_unspecified() => Some(address),
        _ => None,
    }
}
