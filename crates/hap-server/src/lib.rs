//! # hap-server
//!
//! HAP transport for an accessory.
//!
//! This crate provides:
//! - Incremental HTTP/1.1 request parsing and response/event writing
//! - The per-connection handler that drives pairing and the encrypted channel
//! - A registry that keeps one session per controller address
//! - Event fan-out to verified sessions
//! - The TCP server tying them together

mod connection;
mod events;
mod registry;
mod request;
mod response;
mod server;
mod traits;

pub use connection::Connection;
pub use events::{Notifier, EVENT_QUEUE_LEN};
pub use registry::SessionRegistry;
pub use request::{HttpRequest, Method, RequestParser};
pub use response::{
    HttpResponse, Protocol, StatusCode, CONTENT_TYPE_JSON, CONTENT_TYPE_TLV8,
    STATUS_INSUFFICIENT_PRIVILEGES,
};
pub use server::AccessoryServer;
pub use traits::{NotFoundRouter, RequestRouter, RouteContext};
