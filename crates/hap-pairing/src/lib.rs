//! # hap-pairing
//!
//! Accessory side of HomeKit pairing.
//!
//! This crate implements:
//! - Pair-setup (SRP-6a, M1-M6) for first-time pairing
//! - Pair-verify (Curve25519 + Ed25519, M1-M4) for each new connection
//! - `/pairings` add, remove and list for admin controllers
//! - The encrypted transport framer installed after pair-verify
//! - Persistent storage of the accessory identity and paired controllers

mod channel;
mod context;
#[cfg(any(test, feature = "test-util"))]
pub mod controller;
mod identity;
mod pair_setup;
mod pair_verify;
mod pairings;
mod protocol;
mod store;
mod traits;

pub use channel::EncryptedChannel;
pub use context::PairingContext;
pub use identity::{
    format_pairing_id, parse_pairing_id, PairedClient, ServerIdentity, PERMISSION_ADMIN,
    PERMISSION_USER,
};
pub use pair_setup::{PairSetup, SetupState};
pub use pair_verify::{PairVerify, VerifiedSession, VerifyState};
pub use pairings::handle_pairings;
pub use protocol::{status_for, Method};
pub use store::{FileStore, MemoryStore};
pub use traits::PairingStore;
