//! Session key types and derivation.

use crate::hkdf;
use hap_core::error::CryptoError;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Shared secret from SRP or ECDH.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(pub Vec<u8>);

/// 32-byte encryption key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey(pub [u8; 32]);

/// Keys for one encrypted HAP connection, from the accessory's point of view.
#[derive(ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Key for encrypting data we send.
    pub write_key: EncryptionKey,
    /// Key for decrypting data we receive.
    pub read_key: EncryptionKey,
}

impl SharedSecret {
    /// Create from raw bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl EncryptionKey {
    /// Create from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl SessionKeys {
    /// Derive control channel keys for the accessory.
    ///
    /// The controller writes with `Control-Write-Encryption-Key`, so that is
    /// what the accessory reads with, and vice versa.
    pub fn derive_accessory_keys(shared_secret: &SharedSecret) -> Result<Self, CryptoError> {
        let read_key = hkdf::derive_control_write_key(shared_secret.as_bytes())?;
        let write_key = hkdf::derive_control_read_key(shared_secret.as_bytes())?;

        Ok(Self {
            write_key: EncryptionKey(write_key),
            read_key: EncryptionKey(read_key),
        })
    }

    /// Derive control channel keys for the controller.
    pub fn derive_controller_keys(shared_secret: &SharedSecret) -> Result<Self, CryptoError> {
        let accessory = Self::derive_accessory_keys(shared_secret)?;
        Ok(Self {
            write_key: accessory.read_key.clone(),
            read_key: accessory.write_key.clone(),
        })
    }

    /// Derive the pair-setup encryption key.
    pub fn derive_pair_setup_key(
        shared_secret: &SharedSecret,
    ) -> Result<EncryptionKey, CryptoError> {
        let key = hkdf::derive_pair_setup_key(shared_secret.as_bytes())?;
        Ok(EncryptionKey(key))
    }

    /// Derive the pair-verify encryption key.
    pub fn derive_pair_verify_key(
        shared_secret: &SharedSecret,
    ) -> Result<EncryptionKey, CryptoError> {
        let key = hkdf::derive_pair_verify_key(shared_secret.as_bytes())?;
        Ok(EncryptionKey(key))
    }
}
