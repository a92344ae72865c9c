//! Constants and status mapping shared by the pairing endpoints.

use hap_core::error::{Error, PairingError};
use hap_crypto::tlv::{Tlv8, TlvErrorCode};
use tracing::warn;

/// Nonce labels for the encrypted sub-TLVs.
pub const PS_MSG05_NONCE: &[u8] = b"PS-Msg05";
pub const PS_MSG06_NONCE: &[u8] = b"PS-Msg06";
pub const PV_MSG02_NONCE: &[u8] = b"PV-Msg02";
pub const PV_MSG03_NONCE: &[u8] = b"PV-Msg03";

/// Values of the `Method` TLV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Method {
    PairSetup = 0x00,
    PairSetupWithAuth = 0x01,
    PairVerify = 0x02,
    AddPairing = 0x03,
    RemovePairing = 0x04,
    ListPairings = 0x05,
}

impl Method {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::PairSetup),
            0x01 => Some(Self::PairSetupWithAuth),
            0x02 => Some(Self::PairVerify),
            0x03 => Some(Self::AddPairing),
            0x04 => Some(Self::RemovePairing),
            0x05 => Some(Self::ListPairings),
            _ => None,
        }
    }
}

/// Status code reported to the controller for a failed step.
pub fn status_for(err: &Error) -> TlvErrorCode {
    match err {
        Error::Pairing(PairingError::SrpVerificationFailed)
        | Error::Pairing(PairingError::SignatureInvalid)
        | Error::Pairing(PairingError::UnknownController(_))
        | Error::Pairing(PairingError::NotAdmin)
        | Error::Crypto(_) => TlvErrorCode::Authentication,
        Error::Pairing(PairingError::AlreadyPaired) => TlvErrorCode::Unavailable,
        _ => TlvErrorCode::Unknown,
    }
}

/// Log a failed step and build the error reply.
pub(crate) fn error_reply(endpoint: &'static str, state: u8, err: &Error) -> Vec<u8> {
    let code = status_for(err);
    warn!(endpoint, state, error = %err, status = code.description(), "pairing step failed");
    Tlv8::error_reply(state, code).encode()
}
