//! # hap-crypto
//!
//! Cryptographic building blocks for the accessory side of HAP pairing.
//!
//! This crate provides:
//! - TLV8 encoding for pairing messages
//! - SRP-6a (3072-bit, g=5) server for pair-setup
//! - X25519 ECDH and Ed25519 signatures for pair-verify
//! - ChaCha20-Poly1305 AEAD and the framed control channel cipher
//! - HKDF-SHA512 key derivation
//!
//! All secret material is zeroized on drop.

pub mod chacha;
pub mod curve25519;
pub mod ed25519;
pub mod hkdf;
pub mod keys;
pub mod srp;
pub mod tlv;

pub use chacha::ControlCipher;
pub use keys::{EncryptionKey, SessionKeys, SharedSecret};
pub use tlv::{Tlv8, TlvErrorCode, TlvType};
