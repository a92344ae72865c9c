//! X25519 ephemeral key agreement for pair-verify.

use hap_core::error::CryptoError;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::ZeroizeOnDrop;

/// X25519 public key length.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Ephemeral X25519 key pair, created once per pair-verify attempt.
#[derive(ZeroizeOnDrop)]
pub struct EcdhKeyPair {
    #[zeroize(skip)]
    public: [u8; 32],
    secret: [u8; 32],
}

impl EcdhKeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            public: public.to_bytes(),
            secret: secret.to_bytes(),
        }
    }

    /// Create from existing secret key bytes.
    pub fn from_secret(secret: &[u8; 32]) -> Self {
        let static_secret = StaticSecret::from(*secret);
        let public = PublicKey::from(&static_secret);
        Self {
            public: public.to_bytes(),
            secret: *secret,
        }
    }

    /// Get the public key (32 bytes).
    pub fn public_key(&self) -> [u8; 32] {
        self.public
    }

    /// Compute the shared secret with a peer, consuming the key pair.
    ///
    /// All-zero peer keys and all-zero results (low-order points) are rejected.
    pub fn diffie_hellman(self, peer_public: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
        if peer_public.iter().all(|&b| b == 0) {
            return Err(CryptoError::InvalidPublicKey(
                "all-zero X25519 key".to_string(),
            ));
        }

        let static_secret = StaticSecret::from(self.secret);
        let shared = static_secret.diffie_hellman(&PublicKey::from(*peer_public));

        let shared_bytes = shared.to_bytes();
        if shared_bytes.iter().all(|&b| b == 0) {
            return Err(CryptoError::InvalidPublicKey(
                "low-order X25519 point".to_string(),
            ));
        }

        Ok(shared_bytes)
    }

    /// Same as [`diffie_hellman`](Self::diffie_hellman) for a key taken off
    /// the wire.
    pub fn diffie_hellman_slice(self, peer_public: &[u8]) -> Result<[u8; 32], CryptoError> {
        let peer: &[u8; PUBLIC_KEY_LEN] =
            peer_public
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: PUBLIC_KEY_LEN,
                    actual: peer_public.len(),
                })?;
        self.diffie_hellman(peer)
    }
}
