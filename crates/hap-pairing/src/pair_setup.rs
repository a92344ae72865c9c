//! Accessory side of HomeKit pair-setup (M1-M6).
//!
//! The controller proves knowledge of the setup code through SRP-6a, then
//! both sides exchange long-term Ed25519 keys inside a ChaCha20-Poly1305
//! envelope keyed from the SRP secret.

use crate::context::PairingContext;
use crate::identity::{parse_pairing_id, PairedClient, PERMISSION_ADMIN};
use crate::protocol::{error_reply, Method, PS_MSG05_NONCE, PS_MSG06_NONCE};
use hap_core::error::{Error, PairingError, Result};
use hap_crypto::{
    chacha::{decrypt_with_nonce, encrypt_with_nonce, nonce_from_string},
    ed25519,
    hkdf,
    keys::{EncryptionKey, SessionKeys},
    srp::{SrpServer, PAIR_SETUP_USERNAME, SALT_BYTES},
    tlv::{Tlv8, TlvType},
};
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;
use tracing::{debug, info};

/// Where a pair-setup exchange stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupState {
    AwaitingM1,
    AwaitingM3,
    AwaitingM5,
    Complete,
    /// A step failed; every further message is refused.
    Abandoned,
}

impl SetupState {
    /// The request state this step accepts, 0 if none.
    fn expected(self) -> u8 {
        match self {
            Self::AwaitingM1 => 1,
            Self::AwaitingM3 => 3,
            Self::AwaitingM5 => 5,
            Self::Complete | Self::Abandoned => 0,
        }
    }
}

/// Pair-setup state machine for one connection.
pub struct PairSetup {
    context: Arc<PairingContext>,
    state: SetupState,
    srp: Option<SrpServer>,
    session_key: Option<EncryptionKey>,
}

impl PairSetup {
    pub fn new(context: Arc<PairingContext>) -> Self {
        Self {
            context,
            state: SetupState::AwaitingM1,
            srp: None,
            session_key: None,
        }
    }

    pub fn state(&self) -> SetupState {
        self.state
    }

    /// Handle one `/pair-setup` request body and return the reply body.
    ///
    /// Only the next state in sequence is accepted. Any failure is answered
    /// with an error TLV and abandons the exchange.
    pub async fn handle(&mut self, body: &[u8]) -> Vec<u8> {
        let request = Tlv8::decode(body);
        let reply_state = request
            .state()
            .unwrap_or(self.state.expected())
            .saturating_add(1);

        match self.process(&request).await {
            Ok(reply) => reply.encode(),
            Err(err) => {
                self.abandon();
                error_reply("pair-setup", reply_state, &err)
            }
        }
    }

    async fn process(&mut self, request: &Tlv8) -> Result<Tlv8> {
        let state = request
            .state()
            .ok_or(PairingError::MissingTlv(TlvType::State as u8))?;

        match (self.state, state) {
            (SetupState::AwaitingM1, 1) => self.m1(request).await,
            (SetupState::AwaitingM3, 3) => self.m3(request),
            (SetupState::AwaitingM5, 5) => self.m5(request).await,
            (current, actual) => Err(PairingError::StateMismatch {
                expected: current.expected(),
                actual,
            }
            .into()),
        }
    }

    fn abandon(&mut self) {
        self.state = SetupState::Abandoned;
        self.srp = None;
        self.session_key = None;
    }

    /// M1 -> M2: {State=2, Salt, PublicKey}
    async fn m1(&mut self, request: &Tlv8) -> Result<Tlv8> {
        let method = request
            .method()
            .ok_or(PairingError::MissingTlv(TlvType::Method as u8))?;
        match Method::from_byte(method) {
            Some(Method::PairSetup) | Some(Method::PairSetupWithAuth) => {}
            _ => return Err(PairingError::UnsupportedMethod(method).into()),
        }

        if self.context.is_paired().await {
            return Err(PairingError::AlreadyPaired.into());
        }

        let mut salt = [0u8; SALT_BYTES];
        OsRng.fill_bytes(&mut salt);

        let mut srp = SrpServer::new();
        srp.set_salt(&salt);
        srp.set_username_and_password(
            PAIR_SETUP_USERNAME,
            self.context.setup_code().as_str().as_bytes(),
        );
        let public_key = srp.public_key();

        debug!(method, "pair-setup M1");
        self.srp = Some(srp);
        self.state = SetupState::AwaitingM3;

        Ok(Tlv8::new()
            .with(TlvType::State, [2])
            .with(TlvType::Salt, salt.to_vec())
            .with(TlvType::PublicKey, public_key))
    }

    /// M3 -> M4: {State=4, Proof}
    fn m3(&mut self, request: &Tlv8) -> Result<Tlv8> {
        let client_public = request.require(TlvType::PublicKey, "public key")?;
        let client_proof = request.require(TlvType::Proof, "proof")?;
        let srp = self
            .srp
            .as_mut()
            .ok_or_else(|| PairingError::Protocol("M3 without SRP session".to_string()))?;

        srp.compute_key(client_public)
            .map_err(|_| Error::Pairing(PairingError::SrpVerificationFailed))?;
        let server_proof = srp
            .try_respond(client_proof)
            .ok_or(PairingError::SrpVerificationFailed)?;

        self.session_key = Some(SessionKeys::derive_pair_setup_key(srp.shared_secret())?);
        self.state = SetupState::AwaitingM5;
        debug!("pair-setup M3 proof accepted");

        Ok(Tlv8::new()
            .with(TlvType::State, [4])
            .with(TlvType::Proof, server_proof))
    }

    /// M5 -> M6: {State=6, EncryptedData}
    async fn m5(&mut self, request: &Tlv8) -> Result<Tlv8> {
        let (session_key, srp) = match (&self.session_key, &self.srp) {
            (Some(key), Some(srp)) => (key.clone(), srp),
            _ => return Err(PairingError::Protocol("M5 without session key".to_string()).into()),
        };
        let shared_secret = srp.shared_secret().as_bytes().to_vec();

        let plaintext = decrypt_with_nonce(
            session_key.as_bytes(),
            &nonce_from_string(PS_MSG05_NONCE),
            request.require(TlvType::EncryptedData, "encrypted data")?,
        )?;
        let sub_tlv = Tlv8::decode(&plaintext);
        let identifier = sub_tlv.require(TlvType::Identifier, "identifier")?;
        let ltpk = sub_tlv.require(TlvType::PublicKey, "public key")?;
        let signature = sub_tlv.require(TlvType::Signature, "signature")?;

        let device_x = hkdf::derive_controller_sign_key(&shared_secret)?;
        let mut device_info = device_x.to_vec();
        device_info.extend_from_slice(identifier);
        device_info.extend_from_slice(ltpk);
        ed25519::verify_slices(ltpk, &device_info, signature)
            .map_err(|_| Error::Pairing(PairingError::SignatureInvalid))?;

        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(ltpk);
        let client = PairedClient::new(parse_pairing_id(identifier)?, public_key, PERMISSION_ADMIN);
        let pairing_id = client.pairing_id();
        // Another setup may have completed since M1.
        self.context.add_first_admin(client).await?;

        let accessory_x = hkdf::derive_accessory_sign_key(&shared_secret)?;
        let accessory_id = self.context.pairing_id();
        let accessory_ltpk = self.context.public_key();
        let mut accessory_info = accessory_x.to_vec();
        accessory_info.extend_from_slice(accessory_id.as_bytes());
        accessory_info.extend_from_slice(&accessory_ltpk);

        let reply_tlv = Tlv8::new()
            .with(TlvType::Identifier, accessory_id.into_bytes())
            .with(TlvType::PublicKey, accessory_ltpk.to_vec())
            .with(TlvType::Signature, self.context.sign(&accessory_info).to_vec());
        let encrypted = encrypt_with_nonce(
            session_key.as_bytes(),
            &nonce_from_string(PS_MSG06_NONCE),
            &reply_tlv.encode(),
        )?;

        self.state = SetupState::Complete;
        self.srp = None;
        self.session_key = None;
        info!(controller = %pairing_id, "pair-setup complete");

        Ok(Tlv8::new()
            .with(TlvType::State, [6])
            .with(TlvType::EncryptedData, encrypted))
    }
}
