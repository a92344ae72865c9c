//! Accessory identification types.

use crate::error::ParseError;
use rand::RngCore;
use std::fmt;
use std::str::FromStr;

/// Accessory pairing identifier, formatted like a MAC address.
///
/// HAP advertises this as the `id` TXT field and uses the colon-separated
/// string form as the accessory pairing identifier inside signed transcripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub [u8; 6]);

impl DeviceId {
    /// Generate a random identifier.
    pub fn random() -> Self {
        let mut bytes = [0u8; 6];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse a MAC-style identifier from string.
    ///
    /// Supports formats:
    /// - Colon-separated: "AA:BB:CC:DD:EE:FF"
    /// - Hyphen-separated: "AA-BB-CC-DD-EE-FF"
    /// - Bare hex: "AABBCCDDEEFF"
    pub fn from_mac_string(s: &str) -> Result<Self, ParseError> {
        let s = s.trim();

        let parts: Vec<&str> = if s.contains(':') {
            s.split(':').collect()
        } else if s.contains('-') {
            s.split('-').collect()
        } else {
            if s.len() != 12 || !s.is_ascii() {
                return Err(ParseError::InvalidFormat(format!(
                    "device id must be 12 hex characters, got {}",
                    s.len()
                )));
            }
            (0..6).map(|i| &s[i * 2..i * 2 + 2]).collect()
        };

        if parts.len() != 6 {
            return Err(ParseError::InvalidFormat(format!(
                "device id must have 6 bytes, got {}",
                parts.len()
            )));
        }

        let mut arr = [0u8; 6];
        for (slot, part) in arr.iter_mut().zip(parts) {
            *slot = u8::from_str_radix(part, 16)
                .map_err(|_| ParseError::InvalidHex(part.to_string()))?;
        }
        Ok(Self(arr))
    }

    /// Convert to colon-separated string (uppercase).
    pub fn to_mac_string(&self) -> String {
        format!(
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_mac_string())
    }
}

impl FromStr for DeviceId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_mac_string(s)
    }
}

/// Accessory setup code in `XXX-XX-XXX` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupCode(String);

/// Codes HAP forbids because they are trivially guessable.
const INVALID_SETUP_CODES: [&str; 12] = [
    "000-00-000",
    "111-11-111",
    "222-22-222",
    "333-33-333",
    "444-44-444",
    "555-55-555",
    "666-66-666",
    "777-77-777",
    "888-88-888",
    "999-99-999",
    "123-45-678",
    "876-54-321",
];

impl SetupCode {
    /// Parse and validate a setup code.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let s = s.trim();
        let bytes = s.as_bytes();
        let well_formed = bytes.len() == 10
            && bytes[3] == b'-'
            && bytes[6] == b'-'
            && bytes
                .iter()
                .enumerate()
                .all(|(i, b)| i == 3 || i == 6 || b.is_ascii_digit());

        if !well_formed {
            return Err(ParseError::InvalidFormat(
                "setup code must look like XXX-XX-XXX".to_string(),
            ));
        }
        if INVALID_SETUP_CODES.contains(&s) {
            return Err(ParseError::InvalidValue(format!(
                "setup code {} is not allowed",
                s
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// The code as used for the SRP password.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SetupCode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod device_id {
        use super::*;

        #[test]
        fn parse_valid_colon_separated() {
            let id = DeviceId::from_mac_string("AA:BB:CC:DD:EE:FF").unwrap();
            assert_eq!(id.0, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        }

        #[test]
        fn parse_valid_hyphen_separated() {
            let id = DeviceId::from_mac_string("aa-bb-cc-dd-ee-ff").unwrap();
            assert_eq!(id.0, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        }

        #[test]
        fn parse_valid_bare() {
            let id: DeviceId = "AABBCCDDEEFF".parse().unwrap();
            assert_eq!(id.0, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        }

        #[test]
        fn parse_rejects_wrong_length() {
            assert!(DeviceId::from_mac_string("AA:BB:CC").is_err());
            assert!(DeviceId::from_mac_string("AABBCC").is_err());
        }

        #[test]
        fn parse_rejects_bad_hex() {
            assert!(DeviceId::from_mac_string("GG:HH:II:JJ:KK:LL").is_err());
        }

        #[test]
        fn display_matches_mac_string() {
            let id = DeviceId([0x58, 0x55, 0xCA, 0x1A, 0xE2, 0x88]);
            assert_eq!(id.to_string(), "58:55:CA:1A:E2:88");
            assert_eq!(DeviceId::from_mac_string(&id.to_string()).unwrap(), id);
        }

        #[test]
        fn random_ids_differ() {
            assert_ne!(DeviceId::random(), DeviceId::random());
        }
    }

    mod setup_code {
        use super::*;

        #[test]
        fn accepts_well_formed_code() {
            let code = SetupCode::parse("031-45-154").unwrap();
            assert_eq!(code.as_str(), "031-45-154");
        }

        #[test]
        fn rejects_malformed_codes() {
            assert!(SetupCode::parse("03145154").is_err());
            assert!(SetupCode::parse("031-45-15").is_err());
            assert!(SetupCode::parse("03a-45-154").is_err());
        }

        #[test]
        fn rejects_trivial_codes() {
            assert!(SetupCode::parse("111-11-111").is_err());
            assert!(SetupCode::parse("123-45-678").is_err());
        }
    }
}
