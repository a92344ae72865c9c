//! ChaCha20-Poly1305 AEAD for pairing messages and the HAP control channel.

use hap_core::error::CryptoError;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use zeroize::ZeroizeOnDrop;

/// Poly1305 tag length.
pub const TAG_LEN: usize = 16;

/// Largest plaintext carried by one control channel frame.
pub const MAX_FRAME_LEN: usize = 0x400;

/// Bytes of the little-endian length prefix on each frame.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Encrypt with an explicit nonce and associated data.
///
/// Returns the ciphertext and the detached 16-byte tag.
pub fn encrypt(
    key: &[u8; 32],
    nonce: &[u8; 12],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_LEN]), CryptoError> {
    let cipher = ChaCha20Poly1305::new(&(*key).into());
    let payload = Payload { msg: plaintext, aad };

    let mut ciphertext = cipher
        .encrypt(Nonce::from_slice(nonce), payload)
        .map_err(|e| CryptoError::Encryption(format!("Encryption failed: {}", e)))?;

    let tag_bytes = ciphertext.split_off(ciphertext.len() - TAG_LEN);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&tag_bytes);
    Ok((ciphertext, tag))
}

/// Decrypt with an explicit nonce, detached tag and associated data.
///
/// Any tag mismatch yields [`CryptoError::AuthTagMismatch`] and no plaintext.
pub fn decrypt(
    key: &[u8; 32],
    nonce: &[u8; 12],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(&(*key).into());

    let mut ciphertext_with_tag = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    ciphertext_with_tag.extend_from_slice(ciphertext);
    ciphertext_with_tag.extend_from_slice(tag);

    let payload = Payload {
        msg: &ciphertext_with_tag,
        aad,
    };
    cipher
        .decrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| CryptoError::AuthTagMismatch)
}

/// Encrypt with explicit 12-byte nonce and no associated data.
///
/// Returns ciphertext with 16-byte auth tag appended.
pub fn encrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8; 12],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(&(*key).into());
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(format!("Encryption failed: {}", e)))
}

/// Decrypt with explicit 12-byte nonce and no associated data.
///
/// Expects ciphertext with 16-byte auth tag appended.
pub fn decrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8; 12],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::Decryption(
            "Ciphertext too short (missing tag)".to_string(),
        ));
    }

    let cipher = ChaCha20Poly1305::new(&(*key).into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthTagMismatch)
}

/// Create a 12-byte nonce from a string (right-aligned, left-padded with zeros).
///
/// HomeKit nonces like "PV-Msg02" become: `\x00\x00\x00\x00PV-Msg02`
pub fn nonce_from_string(s: &[u8]) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    let len = s.len().min(12);
    nonce[12 - len..].copy_from_slice(&s[..len]);
    nonce
}

/// Build 12-byte nonce from counter.
fn build_nonce_from_counter(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..12].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Control channel cipher with per-direction counters.
///
/// Frames are `[u16_le len][ciphertext][16-byte tag]`, with the two length
/// bytes doubling as associated data. Each frame consumes one counter value.
#[derive(ZeroizeOnDrop)]
pub struct ControlCipher {
    write_key: [u8; 32],
    read_key: [u8; 32],
    #[zeroize(skip)]
    write_cipher: ChaCha20Poly1305,
    #[zeroize(skip)]
    read_cipher: ChaCha20Poly1305,
    #[zeroize(skip)]
    encrypt_counter: u64,
    #[zeroize(skip)]
    decrypt_counter: u64,
}

impl ControlCipher {
    /// Create cipher with separate write/read keys.
    pub fn new(write_key: [u8; 32], read_key: [u8; 32]) -> Self {
        let write_cipher = ChaCha20Poly1305::new(&write_key.into());
        let read_cipher = ChaCha20Poly1305::new(&read_key.into());
        Self {
            write_key,
            read_key,
            write_cipher,
            read_cipher,
            encrypt_counter: 0,
            decrypt_counter: 0,
        }
    }

    /// Encrypt plaintext into one or more frames.
    ///
    /// Empty input produces empty output and consumes no counter values.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let frames = plaintext.len().div_ceil(MAX_FRAME_LEN);
        let mut out = Vec::with_capacity(plaintext.len() + frames * (LENGTH_PREFIX_LEN + TAG_LEN));

        for block in plaintext.chunks(MAX_FRAME_LEN) {
            let aad = (block.len() as u16).to_le_bytes();
            let nonce = build_nonce_from_counter(self.encrypt_counter);
            let payload = Payload { msg: block, aad: &aad };

            let ciphertext_with_tag = self
                .write_cipher
                .encrypt(Nonce::from_slice(&nonce), payload)
                .map_err(|e| CryptoError::Encryption(format!("Encryption failed: {}", e)))?;

            out.extend_from_slice(&aad);
            out.extend_from_slice(&ciphertext_with_tag);
            self.encrypt_counter += 1;
        }

        Ok(out)
    }

    /// Total wire size of the first frame in `data`, if its header is present.
    pub fn frame_len(data: &[u8]) -> Option<usize> {
        if data.len() < LENGTH_PREFIX_LEN {
            return None;
        }
        let block_len = u16::from_le_bytes([data[0], data[1]]) as usize;
        Some(LENGTH_PREFIX_LEN + block_len + TAG_LEN)
    }

    /// Decrypt one complete frame.
    pub fn decrypt_frame(&mut self, frame: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let expected = Self::frame_len(frame)
            .ok_or_else(|| CryptoError::Decryption("Incomplete length prefix".to_string()))?;
        let block_len = expected - LENGTH_PREFIX_LEN - TAG_LEN;
        if block_len > MAX_FRAME_LEN {
            return Err(CryptoError::Decryption(format!(
                "Frame length {} exceeds {}",
                block_len, MAX_FRAME_LEN
            )));
        }
        if frame.len() != expected {
            return Err(CryptoError::Decryption(
                "Incomplete ciphertext block".to_string(),
            ));
        }

        let nonce = build_nonce_from_counter(self.decrypt_counter);
        let payload = Payload {
            msg: &frame[LENGTH_PREFIX_LEN..],
            aad: &frame[..LENGTH_PREFIX_LEN],
        };
        let plaintext = self
            .read_cipher
            .decrypt(Nonce::from_slice(&nonce), payload)
            .map_err(|_| CryptoError::AuthTagMismatch)?;

        self.decrypt_counter += 1;
        Ok(plaintext)
    }

    /// Decrypt a buffer holding whole frames.
    ///
    /// Fails as a unit: on any error no plaintext is returned.
    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut out = Vec::with_capacity(data.len());
        let mut offset = 0;

        while offset < data.len() {
            let frame_len = Self::frame_len(&data[offset..])
                .ok_or_else(|| CryptoError::Decryption("Incomplete length prefix".to_string()))?;
            let end = offset + frame_len;
            if end > data.len() {
                return Err(CryptoError::Decryption(
                    "Incomplete ciphertext block".to_string(),
                ));
            }
            out.extend_from_slice(&self.decrypt_frame(&data[offset..end])?);
            offset = end;
        }

        Ok(out)
    }

    /// Get current encryption nonce counter.
    pub fn encrypt_counter(&self) -> u64 {
        self.encrypt_counter
    }

    /// Get current decryption nonce counter.
    pub fn decrypt_counter(&self) -> u64 {
        self.decrypt_counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Ciphers for both ends of one connection.
    fn pair() -> (ControlCipher, ControlCipher) {
        let a_to_b = [0x11u8; 32];
        let b_to_a = [0x22u8; 32];
        (
            ControlCipher::new(a_to_b, b_to_a),
            ControlCipher::new(b_to_a, a_to_b),
        )
    }

    mod one_shot {
        use super::*;

        #[test]
        fn roundtrip_with_detached_tag() {
            let key = [0x42u8; 32];
            let nonce = nonce_from_string(b"PS-Msg05");
            let (ciphertext, tag) = encrypt(&key, &nonce, b"hello accessory", b"aad").unwrap();
            assert_eq!(ciphertext.len(), 15);

            let plaintext = decrypt(&key, &nonce, &ciphertext, &tag, b"aad").unwrap();
            assert_eq!(plaintext, b"hello accessory");
        }

        #[test]
        fn wrong_aad_is_auth_failure() {
            let key = [0x42u8; 32];
            let nonce = [0u8; 12];
            let (ciphertext, tag) = encrypt(&key, &nonce, b"payload", b"one").unwrap();
            let err = decrypt(&key, &nonce, &ciphertext, &tag, b"two").unwrap_err();
            assert!(matches!(err, CryptoError::AuthTagMismatch));
        }

        #[test]
        fn combined_tag_roundtrip() {
            let key = [0x07u8; 32];
            let nonce = nonce_from_string(b"PV-Msg02");
            let sealed = encrypt_with_nonce(&key, &nonce, b"sub-tlv").unwrap();
            assert_eq!(sealed.len(), 7 + TAG_LEN);
            assert_eq!(decrypt_with_nonce(&key, &nonce, &sealed).unwrap(), b"sub-tlv");
        }

        #[test]
        fn combined_tag_rejects_short_input() {
            assert!(decrypt_with_nonce(&[0u8; 32], &[0u8; 12], &[0u8; 8]).is_err());
        }
    }

    mod control_cipher {
        use super::*;

        #[test]
        fn roundtrip_across_frame_sizes() {
            let (mut tx, mut rx) = pair();
            for len in [0usize, 1, 1024, 1025, 3000] {
                let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
                let framed = tx.encrypt(&plaintext).unwrap();
                assert_eq!(rx.decrypt(&framed).unwrap(), plaintext, "length {}", len);
            }
        }

        #[test]
        fn empty_input_uses_no_counter() {
            let (mut tx, _) = pair();
            assert!(tx.encrypt(&[]).unwrap().is_empty());
            assert_eq!(tx.encrypt_counter(), 0);
        }

        #[test]
        fn frames_are_capped_at_1024_bytes() {
            let (mut tx, _) = pair();
            let framed = tx.encrypt(&[0xAB; 1025]).unwrap();

            assert_eq!(&framed[..2], &1024u16.to_le_bytes());
            let second = 2 + 1024 + TAG_LEN;
            assert_eq!(&framed[second..second + 2], &1u16.to_le_bytes());
            assert_eq!(framed.len(), 2 * (2 + TAG_LEN) + 1025);
            assert_eq!(tx.encrypt_counter(), 2);
        }

        #[test]
        fn counters_advance_per_frame() {
            let (mut tx, mut rx) = pair();
            let framed = tx.encrypt(&[0u8; 3000]).unwrap();
            rx.decrypt(&framed).unwrap();
            assert_eq!(tx.encrypt_counter(), 3);
            assert_eq!(rx.decrypt_counter(), 3);
        }

        #[test]
        fn nonce_counter_is_little_endian_in_low_bytes() {
            let nonce = build_nonce_from_counter(0x0102);
            assert_eq!(nonce, [0, 0, 0, 0, 0x02, 0x01, 0, 0, 0, 0, 0, 0]);
        }

        #[test]
        fn matches_manual_frame_encoding() {
            let key = [0x33u8; 32];
            let mut tx = ControlCipher::new(key, [0u8; 32]);
            let framed = tx.encrypt(b"GET /accessories").unwrap();

            let aad = 16u16.to_le_bytes();
            let (ciphertext, tag) = encrypt(&key, &[0u8; 12], b"GET /accessories", &aad).unwrap();
            let mut expected = aad.to_vec();
            expected.extend_from_slice(&ciphertext);
            expected.extend_from_slice(&tag);
            assert_eq!(framed, expected);
        }

        #[test]
        fn every_bit_flip_is_rejected() {
            let (mut tx, _) = pair();
            let framed = tx.encrypt(b"characteristics").unwrap();

            for byte in 0..framed.len() {
                for bit in 0..8 {
                    let mut tampered = framed.clone();
                    tampered[byte] ^= 1 << bit;
                    let mut rx = ControlCipher::new([0x22u8; 32], [0x11u8; 32]);
                    assert!(rx.decrypt(&tampered).is_err(), "byte {} bit {}", byte, bit);
                    assert_eq!(rx.decrypt_counter(), 0);
                }
            }
        }

        #[test]
        fn failure_in_later_frame_fails_whole_call() {
            let (mut tx, mut rx) = pair();
            let mut framed = tx.encrypt(&[0x55; 2000]).unwrap();
            let last = framed.len() - 1;
            framed[last] ^= 0x80;
            assert!(rx.decrypt(&framed).is_err());
        }

        #[test]
        fn truncated_input_is_rejected() {
            let (mut tx, mut rx) = pair();
            let framed = tx.encrypt(b"abc").unwrap();
            assert!(rx.decrypt(&framed[..framed.len() - 1]).is_err());
            assert!(rx.decrypt(&framed[..1]).is_err());
        }

        #[test]
        fn oversized_length_prefix_is_rejected() {
            let mut frame = 1025u16.to_le_bytes().to_vec();
            frame.extend(vec![0u8; 1025 + TAG_LEN]);
            let (_, mut rx) = pair();
            assert!(rx.decrypt_frame(&frame).is_err());
        }

        #[test]
        fn frame_len_reads_prefix() {
            assert_eq!(ControlCipher::frame_len(&[0x05, 0x00]), Some(2 + 5 + 16));
            assert_eq!(ControlCipher::frame_len(&[0x05]), None);
        }
    }

    mod nonce_construction {
        use super::*;

        #[test]
        fn nonce_from_string_right_aligned() {
            let nonce = nonce_from_string(b"PV-Msg02");
            assert_eq!(&nonce[..4], &[0, 0, 0, 0]);
            assert_eq!(&nonce[4..], b"PV-Msg02");
        }

        #[test]
        fn nonce_from_string_truncates_long_input() {
            let nonce = nonce_from_string(b"0123456789ABCDEF");
            assert_eq!(&nonce, b"0123456789AB");
        }
    }

    mod known_vectors {
        use super::*;

        const KEY: &str = "808182838485868788898a8b8c8d8e8f909192939495969798999a9b9c9d9e9f";
        const NONCE: &str = "070000004041424344454647";
        const AAD: &str = "50515253c0c1c2c3c4c5c6c7";
        const PLAINTEXT: &[u8] = b"Ladies and Gentlemen of the class of '99: If I could offer you only one tip for the future, sunscreen would be it.";
        const CIPHERTEXT: &str = "d31a8d34648e60db7b86afbc53ef7ec2a4aded51296e08fea9e2b5a736ee62d63dbea45e8ca9671282fafb69da92728b1a71de0a9e060b2905d6a5b67ecd3b3692ddbd7f2d778b8c9803aee328091b58fab324e4fad675945585808b4831d7bc3ff4def08e4b7a9de576d26586cec64b6116";
        const TAG: &str = "1ae10b594f09e26a7e902ecbd0600691";

        fn fixed<const N: usize>(hex_str: &str) -> [u8; N] {
            let mut out = [0u8; N];
            out.copy_from_slice(&hex::decode(hex_str).unwrap());
            out
        }

        #[test]
        fn rfc8439_aead_test_vector() {
            let (ciphertext, tag) = encrypt(
                &fixed::<32>(KEY),
                &fixed::<12>(NONCE),
                PLAINTEXT,
                &hex::decode(AAD).unwrap(),
            )
            .unwrap();

            assert_eq!(ciphertext, hex::decode(CIPHERTEXT).unwrap());
            assert_eq!(tag, fixed::<16>(TAG));
        }

        #[test]
        fn decrypt_rfc8439_vector() {
            let plaintext = decrypt(
                &fixed::<32>(KEY),
                &fixed::<12>(NONCE),
                &hex::decode(CIPHERTEXT).unwrap(),
                &fixed::<16>(TAG),
                &hex::decode(AAD).unwrap(),
            )
            .unwrap();
            assert_eq!(plaintext, PLAINTEXT);
        }
    }
}
