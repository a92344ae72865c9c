//! Accessory side of HomeKit pair-verify (M1-M4).
//!
//! An ephemeral X25519 exchange, with each side signing both ephemeral keys
//! using its long-term Ed25519 key. The shared secret becomes the source of
//! the control channel keys.

use crate::context::PairingContext;
use crate::identity::parse_pairing_id;
use crate::protocol::{error_reply, PV_MSG02_NONCE, PV_MSG03_NONCE};
use hap_core::error::{Error, PairingError, Result};
use hap_crypto::{
    chacha::{decrypt_with_nonce, encrypt_with_nonce, nonce_from_string},
    curve25519::EcdhKeyPair,
    ed25519,
    keys::{EncryptionKey, SessionKeys, SharedSecret},
    tlv::{Tlv8, TlvType},
};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Where a pair-verify exchange stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyState {
    AwaitingM1,
    AwaitingM3,
    Complete,
    Abandoned,
}

/// Result of a successful pair-verify.
pub struct VerifiedSession {
    pub controller_id: Uuid,
    pub keys: SessionKeys,
}

struct Ephemeral {
    shared: SharedSecret,
    session_key: EncryptionKey,
    accessory_public: [u8; 32],
    controller_public: Vec<u8>,
}

/// Pair-verify state machine for one connection.
pub struct PairVerify {
    context: Arc<PairingContext>,
    state: VerifyState,
    ephemeral: Option<Ephemeral>,
    verified: Option<VerifiedSession>,
}

impl PairVerify {
    pub fn new(context: Arc<PairingContext>) -> Self {
        Self {
            context,
            state: VerifyState::AwaitingM1,
            ephemeral: None,
            verified: None,
        }
    }

    pub fn state(&self) -> VerifyState {
        self.state
    }

    /// Handle one `/pair-verify` request body and return the reply body.
    pub async fn handle(&mut self, body: &[u8]) -> Vec<u8> {
        let request = Tlv8::decode(body);
        let expected = match self.state {
            VerifyState::AwaitingM1 => 1,
            VerifyState::AwaitingM3 => 3,
            VerifyState::Complete | VerifyState::Abandoned => 0,
        };
        let reply_state = request.state().unwrap_or(expected).saturating_add(1);

        let result = match request.state() {
            Some(1) if self.state == VerifyState::AwaitingM1 => self.m1(&request),
            Some(3) if self.state == VerifyState::AwaitingM3 => self.m3(&request).await,
            Some(actual) => Err(PairingError::StateMismatch { expected, actual }.into()),
            None => Err(PairingError::MissingTlv(TlvType::State as u8).into()),
        };

        match result {
            Ok(reply) => reply.encode(),
            Err(err) => {
                self.state = VerifyState::Abandoned;
                self.ephemeral = None;
                error_reply("pair-verify", reply_state, &err)
            }
        }
    }

    /// Take the verified session once M4 has been produced.
    ///
    /// The caller installs the keys after sending the M4 reply in plaintext.
    pub fn take_verified(&mut self) -> Option<VerifiedSession> {
        self.verified.take()
    }

    /// M1 -> M2: {State=2, PublicKey, EncryptedData}
    fn m1(&mut self, request: &Tlv8) -> Result<Tlv8> {
        let controller_public = request.require(TlvType::PublicKey, "public key")?.to_vec();

        let keypair = EcdhKeyPair::generate();
        let accessory_public = keypair.public_key();
        let shared = keypair.diffie_hellman_slice(&controller_public)?;
        let shared = SharedSecret::new(shared.to_vec());
        let session_key = SessionKeys::derive_pair_verify_key(&shared)?;

        let accessory_id = self.context.pairing_id();
        let mut info = accessory_public.to_vec();
        info.extend_from_slice(accessory_id.as_bytes());
        info.extend_from_slice(&controller_public);

        let sub_tlv = Tlv8::new()
            .with(TlvType::Identifier, accessory_id.into_bytes())
            .with(TlvType::Signature, self.context.sign(&info).to_vec());
        let encrypted = encrypt_with_nonce(
            session_key.as_bytes(),
            &nonce_from_string(PV_MSG02_NONCE),
            &sub_tlv.encode(),
        )?;

        self.ephemeral = Some(Ephemeral {
            shared,
            session_key,
            accessory_public,
            controller_public,
        });
        self.state = VerifyState::AwaitingM3;
        debug!("pair-verify M1");

        Ok(Tlv8::new()
            .with(TlvType::State, [2])
            .with(TlvType::PublicKey, accessory_public.to_vec())
            .with(TlvType::EncryptedData, encrypted))
    }

    /// M3 -> M4: {State=4}
    async fn m3(&mut self, request: &Tlv8) -> Result<Tlv8> {
        let ephemeral = self
            .ephemeral
            .take()
            .ok_or_else(|| PairingError::Protocol("M3 without ephemeral keys".to_string()))?;

        let plaintext = decrypt_with_nonce(
            ephemeral.session_key.as_bytes(),
            &nonce_from_string(PV_MSG03_NONCE),
            request.require(TlvType::EncryptedData, "encrypted data")?,
        )?;
        let sub_tlv = Tlv8::decode(&plaintext);
        let identifier = sub_tlv.require(TlvType::Identifier, "identifier")?;
        let signature = sub_tlv.require(TlvType::Signature, "signature")?;

        let controller_id = parse_pairing_id(identifier)?;
        let client = self
            .context
            .client(&controller_id)
            .await
            .ok_or_else(|| PairingError::UnknownController(controller_id.to_string()))?;

        let mut info = ephemeral.controller_public.clone();
        info.extend_from_slice(identifier);
        info.extend_from_slice(&ephemeral.accessory_public);
        ed25519::verify_slices(&client.public_key, &info, signature)
            .map_err(|_| Error::Pairing(PairingError::SignatureInvalid))?;

        let keys = SessionKeys::derive_accessory_keys(&ephemeral.shared)?;
        self.verified = Some(VerifiedSession { controller_id, keys });
        self.state = VerifyState::Complete;
        info!(controller = %client.pairing_id(), "pair-verify complete");

        Ok(Tlv8::new().with(TlvType::State, [4]))
    }
}
