//! Per-connection transport framer.
//!
//! Before pair-verify completes the channel passes bytes through untouched.
//! Once keys are installed, inbound data must be framed ciphertext. Outbound
//! data stays plaintext until the first inbound frame has been decrypted,
//! which lets the pair-verify M4 reply go out unencrypted.
//!
//! ```text
//! +----------------+------------------+----------+
//! | Length (2 LE)  | Ciphertext (N)   | Tag (16) |
//! +----------------+------------------+----------+
//! ```

use hap_core::error::{CryptoError, Result};
use hap_crypto::chacha::{ControlCipher, LENGTH_PREFIX_LEN, MAX_FRAME_LEN, TAG_LEN};
use hap_crypto::keys::SessionKeys;

/// Framer state for one connection.
pub struct EncryptedChannel {
    cipher: Option<ControlCipher>,
    rx_enabled: bool,
    tx_enabled: bool,
    /// Ciphertext received but not yet a whole frame.
    pending: Vec<u8>,
}

impl Default for EncryptedChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl EncryptedChannel {
    /// Plaintext channel.
    pub fn new() -> Self {
        Self {
            cipher: None,
            rx_enabled: false,
            tx_enabled: false,
            pending: Vec::new(),
        }
    }

    /// Install session keys. Inbound traffic is encrypted from here on.
    pub fn install_keys(&mut self, keys: &SessionKeys) {
        self.cipher = Some(ControlCipher::new(
            *keys.write_key.as_bytes(),
            *keys.read_key.as_bytes(),
        ));
        self.rx_enabled = true;
        self.tx_enabled = false;
        self.pending.clear();
    }

    /// Create a channel with explicit keys already installed.
    pub fn with_keys(write_key: [u8; 32], read_key: [u8; 32]) -> Self {
        Self {
            cipher: Some(ControlCipher::new(write_key, read_key)),
            rx_enabled: true,
            tx_enabled: false,
            pending: Vec::new(),
        }
    }

    pub fn rx_enabled(&self) -> bool {
        self.rx_enabled
    }

    pub fn tx_enabled(&self) -> bool {
        self.tx_enabled
    }

    /// Encrypt outbound data, or pass it through before tx is enabled.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        match self.cipher.as_mut() {
            Some(cipher) if self.tx_enabled => Ok(cipher.encrypt(plaintext)?),
            _ => Ok(plaintext.to_vec()),
        }
    }

    /// Decrypt a buffer of whole frames.
    ///
    /// Fails as a unit. The first successful call enables tx.
    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let cipher = match self.cipher.as_mut() {
            Some(cipher) if self.rx_enabled => cipher,
            _ => return Ok(data.to_vec()),
        };

        let plaintext = cipher.decrypt(data)?;
        if !data.is_empty() {
            self.tx_enabled = true;
        }
        Ok(plaintext)
    }

    /// Feed bytes as they arrive from the socket.
    ///
    /// Returns the plaintext of every frame completed so far and keeps any
    /// partial frame for the next call. An error is terminal: the caller
    /// must close the connection.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if !self.rx_enabled {
            return Ok(data.to_vec());
        }
        self.pending.extend_from_slice(data);

        let mut out = Vec::new();
        let mut offset = 0;
        while let Some(frame_len) = ControlCipher::frame_len(&self.pending[offset..]) {
            if frame_len > LENGTH_PREFIX_LEN + MAX_FRAME_LEN + TAG_LEN {
                return Err(CryptoError::Decryption(format!(
                    "frame length {} exceeds {}",
                    frame_len - LENGTH_PREFIX_LEN - TAG_LEN,
                    MAX_FRAME_LEN
                ))
                .into());
            }
            if self.pending.len() - offset < frame_len {
                break;
            }

            let frame = &self.pending[offset..offset + frame_len];
            let cipher = self
                .cipher
                .as_mut()
                .ok_or_else(|| CryptoError::Decryption("no keys installed".to_string()))?;
            out.extend_from_slice(&cipher.decrypt_frame(frame)?);
            self.tx_enabled = true;
            offset += frame_len;
        }

        self.pending.drain(..offset);
        Ok(out)
    }

    /// Bytes of an incomplete frame still buffered.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn write_counter(&self) -> u64 {
        self.cipher.as_ref().map_or(0, ControlCipher::encrypt_counter)
    }

    pub fn read_counter(&self) -> u64 {
        self.cipher.as_ref().map_or(0, ControlCipher::decrypt_counter)
    }
}
