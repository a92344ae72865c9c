//! # hap-discovery
//!
//! Multicast DNS advertisement of a HAP accessory.
//!
//! This crate provides:
//! - Domain name encoding with RFC 1035 label compression
//! - mDNS packet encode/decode with typed record data
//! - The `_hap._tcp` service announcement (PTR, SRV, TXT, A, NSEC)
//! - A responder that answers queries and re-announces periodically
//!
//! ## Example
//!
//! ```ignore
//! use hap_discovery::{MdnsResponder, ServiceAdvertisement};
//!
//! let responder = MdnsResponder::start(&config.mdns).await?;
//! let ad = ServiceAdvertisement::from_config(&config, device_id, port);
//! responder.register(move || ad.packet(false)).await;
//! responder.broadcast().await?;
//! ```

mod advertisement;
pub mod name;
pub mod packet;
mod responder;
mod traits;

use std::net::Ipv4Addr;

pub use advertisement::{
    resolve_address, setup_hash, ServiceAdvertisement, HAP_SERVICE_TYPE, PROTOCOL_VERSION,
};
pub use packet::{Header, Packet, Question, Record, RecordData, RecordType};
pub use responder::{announce_on_change, default_target, MdnsResponder, PacketBuilder, ReceivedPacket};
pub use traits::Announcer;

/// IPv4 mDNS multicast group.
pub const MDNS_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// mDNS UDP port.
pub const MDNS_PORT: u16 = 5353;
