//! Error types for the HAP accessory crates.

use thiserror::Error;

/// Primary error type for all accessory operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("mDNS error: {0}")]
    Mdns(#[from] MdnsError),

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Operation timed out")]
    Timeout,
}

/// Errors raised by the pairing state machines.
#[derive(Error, Debug)]
pub enum PairingError {
    #[error("Invalid setup code: {0}")]
    InvalidSetupCode(String),

    #[error("Pairing state mismatch: expected {expected}, got {actual}")]
    StateMismatch { expected: u8, actual: u8 },

    #[error("Unsupported pairing method: {0}")]
    UnsupportedMethod(u8),

    #[error("Missing required TLV: 0x{0:02x}")]
    MissingTlv(u8),

    #[error("SRP verification failed")]
    SrpVerificationFailed,

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Unknown controller: {0}")]
    UnknownController(String),

    #[error("Accessory is already paired")]
    AlreadyPaired,

    #[error("Controller lacks admin permission")]
    NotAdmin,

    #[error("Pairing session abandoned")]
    Abandoned,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Cryptographic failures.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Authentication tag mismatch")]
    AuthTagMismatch,

    #[error("Signature verification failed")]
    BadSignature,
}

/// Parsing errors for TLV payloads and identifiers.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid hex value: {0}")]
    InvalidHex(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// mDNS packet codec errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MdnsError {
    #[error("Packet truncated at offset {0}")]
    Truncated(usize),

    #[error("Label of {0} bytes exceeds 63")]
    LabelTooLong(usize),

    #[error("Domain name of {0} bytes exceeds 255")]
    NameTooLong(usize),

    #[error("Record data of {0} bytes exceeds 65535")]
    RecordTooLarge(usize),

    #[error("Compression pointer at {position} references offset {offset}")]
    InvalidReference { offset: usize, position: usize },

    #[error("Unsupported label compression prefix 0x{0:02x}")]
    UnsupportedCompression(u8),

    #[error("Label is not valid UTF-8")]
    InvalidLabel,

    #[error("TXT entry of {0} bytes exceeds 255")]
    TxtEntryTooLong(usize),
}

/// HTTP framing errors on the accessory connection.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Message exceeds {limit} bytes")]
    MessageTooLarge { limit: usize },

    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;
