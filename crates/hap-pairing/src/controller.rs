//! Controller side of pair-setup and pair-verify.
//!
//! Drives an accessory the way a phone or hub does. The accessory never needs
//! this; it exists so the accessory state machines can be exercised end to
//! end over real TLV messages, and is only built for tests or with the
//! `test-util` feature.

use crate::identity::{format_pairing_id, PairedClient};
use crate::protocol::{
    Method, PS_MSG05_NONCE, PS_MSG06_NONCE, PV_MSG02_NONCE, PV_MSG03_NONCE,
};
use hap_core::error::{Error, PairingError, Result};
use hap_crypto::{
    chacha::{decrypt_with_nonce, encrypt_with_nonce, nonce_from_string},
    curve25519::EcdhKeyPair,
    ed25519::{self, IdentityKeyPair},
    hkdf,
    keys::{SessionKeys, SharedSecret},
    srp::{SrpChallenge, SrpClient, SrpProof, N_BYTES, PAIR_SETUP_USERNAME, SALT_BYTES},
    tlv::{Tlv8, TlvType},
};
use uuid::Uuid;

/// Controller long-term identity: a UUID and an Ed25519 key.
#[derive(Clone)]
pub struct ControllerIdentity {
    id: Uuid,
    keypair: IdentityKeyPair,
}

impl ControllerIdentity {
    pub fn generate() -> Self {
        Self {
            id: Uuid::new_v4(),
            keypair: IdentityKeyPair::generate(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Identifier bytes as sent in the `Identifier` TLV.
    pub fn pairing_id(&self) -> String {
        format_pairing_id(&self.id)
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_key()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.keypair.sign(message)
    }

    /// The record an accessory keeps for this controller.
    pub fn paired_client(&self, permissions: u8) -> PairedClient {
        PairedClient::new(self.id, self.public_key(), permissions)
    }
}

/// What the controller learns about the accessory from M6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessoryInfo {
    pub pairing_id: String,
    pub public_key: [u8; 32],
}

fn protocol(message: impl Into<String>) -> Error {
    Error::Pairing(PairingError::Protocol(message.into()))
}

/// Decode a reply and check it carries `state` and no error.
fn expect_reply(data: &[u8], state: u8) -> Result<Tlv8> {
    let tlv = Tlv8::decode(data);
    if let Some(desc) = tlv.error_description() {
        return Err(protocol(format!("accessory replied with {}", desc)));
    }
    match tlv.state() {
        Some(actual) if actual == state => Ok(tlv),
        Some(actual) => Err(PairingError::StateMismatch {
            expected: state,
            actual,
        }
        .into()),
        None => Err(PairingError::MissingTlv(TlvType::State as u8).into()),
    }
}

/// Controller half of pair-setup (M1, M3, M5, then M6 check).
pub struct ControllerSetup {
    identity: ControllerIdentity,
    srp: SrpClient,
    proof: Option<SrpProof>,
    session_key: Option<[u8; 32]>,
}

impl ControllerSetup {
    pub fn new(identity: ControllerIdentity, setup_code: &str) -> Self {
        Self {
            identity,
            srp: SrpClient::new(PAIR_SETUP_USERNAME, setup_code.as_bytes()),
            proof: None,
            session_key: None,
        }
    }

    /// M1: {State=1, Method=PairSetup}
    pub fn m1(&self) -> Vec<u8> {
        Tlv8::new()
            .with(TlvType::State, [1])
            .with(TlvType::Method, [Method::PairSetup as u8])
            .encode()
    }

    /// Consume M2 and build M3: {State=3, PublicKey, Proof}
    pub fn m3(&mut self, m2: &[u8]) -> Result<Vec<u8>> {
        let tlv = expect_reply(m2, 2)?;

        let salt: [u8; SALT_BYTES] = tlv
            .require(TlvType::Salt, "salt")?
            .try_into()
            .map_err(|_| protocol("M2 salt must be 16 bytes"))?;

        let server_pk = tlv.require(TlvType::PublicKey, "public key")?;
        if server_pk.len() > N_BYTES {
            return Err(protocol(format!("M2 public key too long: {}", server_pk.len())));
        }
        let mut padded = vec![0u8; N_BYTES - server_pk.len()];
        padded.extend_from_slice(server_pk);

        let proof = self.srp.process_challenge(&SrpChallenge {
            salt,
            server_public_key: padded,
        })?;

        let m3 = Tlv8::new()
            .with(TlvType::State, [3])
            .with(TlvType::PublicKey, self.srp.public_key())
            .with(TlvType::Proof, proof.client_proof.clone())
            .encode();
        self.proof = Some(proof);
        Ok(m3)
    }

    /// Check the server proof in M4 and build M5: {State=5, EncryptedData}
    pub fn m5(&mut self, m4: &[u8]) -> Result<Vec<u8>> {
        let tlv = expect_reply(m4, 4)?;
        let proof = self.proof.as_ref().ok_or_else(|| protocol("M4 before M3"))?;

        let server_proof = tlv.require(TlvType::Proof, "proof")?;
        if !self.srp.verify_server_proof(server_proof, &proof.expected_server_proof) {
            return Err(PairingError::SrpVerificationFailed.into());
        }

        let session_key = hkdf::derive_pair_setup_key(&proof.shared_secret)?;
        let device_x = hkdf::derive_controller_sign_key(&proof.shared_secret)?;

        let pairing_id = self.identity.pairing_id();
        let mut info = device_x.to_vec();
        info.extend_from_slice(pairing_id.as_bytes());
        info.extend_from_slice(&self.identity.public_key());

        let sub_tlv = Tlv8::new()
            .with(TlvType::Identifier, pairing_id.into_bytes())
            .with(TlvType::PublicKey, self.identity.public_key().to_vec())
            .with(TlvType::Signature, self.identity.sign(&info).to_vec());

        let encrypted = encrypt_with_nonce(
            &session_key,
            &nonce_from_string(PS_MSG05_NONCE),
            &sub_tlv.encode(),
        )?;
        self.session_key = Some(session_key);

        Ok(Tlv8::new()
            .with(TlvType::State, [5])
            .with(TlvType::EncryptedData, encrypted)
            .encode())
    }

    /// Decrypt M6 and verify the accessory's signature.
    pub fn finish(&self, m6: &[u8]) -> Result<AccessoryInfo> {
        let tlv = expect_reply(m6, 6)?;
        let session_key = self.session_key.as_ref().ok_or_else(|| protocol("M6 before M5"))?;
        let proof = self.proof.as_ref().ok_or_else(|| protocol("M6 before M3"))?;

        let plaintext = decrypt_with_nonce(
            session_key,
            &nonce_from_string(PS_MSG06_NONCE),
            tlv.require(TlvType::EncryptedData, "encrypted data")?,
        )?;
        let sub_tlv = Tlv8::decode(&plaintext);
        let identifier = sub_tlv.require(TlvType::Identifier, "identifier")?;
        let ltpk = sub_tlv.require(TlvType::PublicKey, "public key")?;
        let signature = sub_tlv.require(TlvType::Signature, "signature")?;

        let accessory_x = hkdf::derive_accessory_sign_key(&proof.shared_secret)?;
        let mut info = accessory_x.to_vec();
        info.extend_from_slice(identifier);
        info.extend_from_slice(ltpk);
        ed25519::verify_slices(ltpk, &info, signature)
            .map_err(|_| Error::Pairing(PairingError::SignatureInvalid))?;

        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(ltpk);
        Ok(AccessoryInfo {
            pairing_id: String::from_utf8_lossy(identifier).into_owned(),
            public_key,
        })
    }
}

/// Controller half of pair-verify (M1, M3, then M4 check).
pub struct ControllerVerify {
    identity: ControllerIdentity,
    ephemeral: Option<EcdhKeyPair>,
    public: [u8; 32],
    shared: Option<SharedSecret>,
}

impl ControllerVerify {
    pub fn new(identity: ControllerIdentity) -> Self {
        let ephemeral = EcdhKeyPair::generate();
        Self {
            identity,
            public: ephemeral.public_key(),
            ephemeral: Some(ephemeral),
            shared: None,
        }
    }

    /// M1: {State=1, PublicKey}
    pub fn m1(&self) -> Vec<u8> {
        Tlv8::pair_verify_m1(&self.public).encode()
    }

    /// Check the accessory's M2 against its long-term key and build M3.
    pub fn m3(&mut self, m2: &[u8], accessory_ltpk: &[u8; 32]) -> Result<Vec<u8>> {
        let tlv = expect_reply(m2, 2)?;
        let accessory_public = tlv.require(TlvType::PublicKey, "public key")?;
        let ephemeral = self.ephemeral.take().ok_or_else(|| protocol("M2 processed twice"))?;
        let shared = ephemeral.diffie_hellman_slice(accessory_public)?;
        let session_key = hkdf::derive_pair_verify_key(&shared)?;

        let plaintext = decrypt_with_nonce(
            &session_key,
            &nonce_from_string(PV_MSG02_NONCE),
            tlv.require(TlvType::EncryptedData, "encrypted data")?,
        )?;
        let sub_tlv = Tlv8::decode(&plaintext);
        let identifier = sub_tlv.require(TlvType::Identifier, "identifier")?;
        let signature = sub_tlv.require(TlvType::Signature, "signature")?;

        let mut accessory_info = accessory_public.to_vec();
        accessory_info.extend_from_slice(identifier);
        accessory_info.extend_from_slice(&self.public);
        ed25519::verify_slices(accessory_ltpk, &accessory_info, signature)
            .map_err(|_| Error::Pairing(PairingError::SignatureInvalid))?;

        let pairing_id = self.identity.pairing_id();
        let mut info = self.public.to_vec();
        info.extend_from_slice(pairing_id.as_bytes());
        info.extend_from_slice(accessory_public);

        let sub_tlv = Tlv8::new()
            .with(TlvType::Identifier, pairing_id.into_bytes())
            .with(TlvType::Signature, self.identity.sign(&info).to_vec());
        let encrypted = encrypt_with_nonce(
            &session_key,
            &nonce_from_string(PV_MSG03_NONCE),
            &sub_tlv.encode(),
        )?;
        self.shared = Some(SharedSecret::new(shared.to_vec()));

        Ok(Tlv8::new()
            .with(TlvType::State, [3])
            .with(TlvType::EncryptedData, encrypted)
            .encode())
    }

    /// Check M4 and derive the controller's control channel keys.
    pub fn finish(&self, m4: &[u8]) -> Result<SessionKeys> {
        expect_reply(m4, 4)?;
        self.session_keys()
    }

    /// Control channel keys, available as soon as M3 is built.
    pub fn session_keys(&self) -> Result<SessionKeys> {
        let shared = self.shared.as_ref().ok_or_else(|| protocol("keys requested before M3"))?;
        Ok(SessionKeys::derive_controller_keys(shared)?)
    }
}
