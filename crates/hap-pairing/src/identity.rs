//! Accessory long-term identity and its paired controllers.

use hap_core::error::{Error, ParseError, Result};
use hap_core::DeviceId;
use hap_crypto::ed25519::IdentityKeyPair;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Permission byte of a regular controller.
pub const PERMISSION_USER: u8 = 0x00;

/// Permission byte of an admin controller.
pub const PERMISSION_ADMIN: u8 = 0x01;

/// A controller that completed pair-setup, or was added by an admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedClient {
    pub id: Uuid,
    #[serde(with = "hex_key")]
    pub public_key: [u8; 32],
    pub permissions: u8,
}

impl PairedClient {
    pub fn new(id: Uuid, public_key: [u8; 32], permissions: u8) -> Self {
        Self {
            id,
            public_key,
            permissions,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.permissions & PERMISSION_ADMIN != 0
    }

    /// Identifier in the uppercase form controllers send.
    pub fn pairing_id(&self) -> String {
        format_pairing_id(&self.id)
    }
}

/// Render a controller UUID the way controllers send it.
pub fn format_pairing_id(id: &Uuid) -> String {
    id.hyphenated().to_string().to_uppercase()
}

/// Parse a controller pairing identifier from TLV bytes.
pub fn parse_pairing_id(bytes: &[u8]) -> std::result::Result<Uuid, ParseError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ParseError::InvalidFormat("pairing id is not UTF-8".to_string()))?;
    Uuid::parse_str(text).map_err(|e| ParseError::InvalidValue(format!("pairing id {}: {}", text, e)))
}

/// The accessory's persistent identity.
#[derive(Clone)]
pub struct ServerIdentity {
    pub device_id: DeviceId,
    pub keypair: IdentityKeyPair,
    pub clients: Vec<PairedClient>,
}

/// On-disk form of [`ServerIdentity`].
#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    device_id: String,
    seed: String,
    #[serde(default)]
    clients: Vec<PairedClient>,
}

impl ServerIdentity {
    /// Fresh identity with a new Ed25519 key and no controllers.
    pub fn generate(device_id: DeviceId) -> Self {
        Self {
            device_id,
            keypair: IdentityKeyPair::generate(),
            clients: Vec::new(),
        }
    }

    /// Accessory pairing identifier used in signed transcripts.
    pub fn pairing_id(&self) -> String {
        self.device_id.to_mac_string()
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_key()
    }

    /// Paired means at least one admin controller exists.
    pub fn is_paired(&self) -> bool {
        self.clients.iter().any(PairedClient::is_admin)
    }

    pub fn client(&self, id: &Uuid) -> Option<&PairedClient> {
        self.clients.iter().find(|c| c.id == *id)
    }

    /// Insert or update a controller.
    ///
    /// An existing controller may change permissions but never its key.
    pub fn upsert_client(&mut self, client: PairedClient) -> Result<()> {
        match self.clients.iter_mut().find(|c| c.id == client.id) {
            Some(existing) if existing.public_key != client.public_key => {
                Err(Error::Pairing(hap_core::PairingError::Protocol(format!(
                    "controller {} already paired with a different key",
                    client.pairing_id()
                ))))
            }
            Some(existing) => {
                existing.permissions = client.permissions;
                Ok(())
            }
            None => {
                self.clients.push(client);
                Ok(())
            }
        }
    }

    /// Remove a controller, returning it if it was present.
    ///
    /// Removing the last admin removes every pairing.
    pub fn remove_client(&mut self, id: &Uuid) -> Option<PairedClient> {
        let index = self.clients.iter().position(|c| c.id == *id)?;
        let removed = self.clients.remove(index);
        if !self.is_paired() {
            self.clients.clear();
        }
        Some(removed)
    }

    pub fn to_json(&self) -> Result<String> {
        let stored = StoredIdentity {
            device_id: self.pairing_id(),
            seed: hex::encode(self.keypair.seed()),
            clients: self.clients.clone(),
        };
        serde_json::to_string_pretty(&stored).map_err(|e| Error::Storage(e.to_string()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let stored: StoredIdentity =
            serde_json::from_str(content).map_err(|e| Error::Storage(e.to_string()))?;

        let device_id = DeviceId::from_mac_string(&stored.device_id)?;
        let seed = <[u8; 32] as hex::FromHex>::from_hex(&stored.seed)
            .map_err(|e| ParseError::InvalidHex(format!("identity seed: {}", e)))?;

        Ok(Self {
            device_id,
            keypair: IdentityKeyPair::from_seed(&seed),
            clients: stored.clients,
        })
    }
}

mod hex_key {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(deserializer)?;
        <[u8; 32] as hex::FromHex>::from_hex(&text).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(permissions: u8) -> PairedClient {
        PairedClient::new(Uuid::new_v4(), IdentityKeyPair::generate().public_key(), permissions)
    }

    mod paired_client {
        use super::*;

        #[test]
        fn pairing_id_is_uppercase_uuid() {
            let id = Uuid::parse_str("b2c8a3f4-1d2e-4f5a-9b8c-7d6e5f4a3b2c").unwrap();
            let c = PairedClient::new(id, [0u8; 32], PERMISSION_ADMIN);
            assert_eq!(c.pairing_id(), "B2C8A3F4-1D2E-4F5A-9B8C-7D6E5F4A3B2C");
            assert!(c.is_admin());
        }

        #[test]
        fn parse_accepts_either_case() {
            let upper = parse_pairing_id(b"B2C8A3F4-1D2E-4F5A-9B8C-7D6E5F4A3B2C").unwrap();
            let lower = parse_pairing_id(b"b2c8a3f4-1d2e-4f5a-9b8c-7d6e5f4a3b2c").unwrap();
            assert_eq!(upper, lower);
        }

        #[test]
        fn parse_rejects_garbage() {
            assert!(parse_pairing_id(b"not-a-uuid").is_err());
            assert!(parse_pairing_id(&[0xFF, 0xFE]).is_err());
        }
    }

    mod clients {
        use super::*;

        #[test]
        fn new_identity_is_unpaired() {
            let identity = ServerIdentity::generate(DeviceId::random());
            assert!(!identity.is_paired());
            assert_eq!(identity.pairing_id().len(), 17);
        }

        #[test]
        fn admin_marks_identity_paired() {
            let mut identity = ServerIdentity::generate(DeviceId::random());
            identity.upsert_client(client(PERMISSION_USER)).unwrap();
            assert!(!identity.is_paired());
            identity.upsert_client(client(PERMISSION_ADMIN)).unwrap();
            assert!(identity.is_paired());
        }

        #[test]
        fn upsert_updates_permissions_but_not_key() {
            let mut identity = ServerIdentity::generate(DeviceId::random());
            let mut c = client(PERMISSION_ADMIN);
            identity.upsert_client(c.clone()).unwrap();

            c.permissions = PERMISSION_USER;
            identity.upsert_client(c.clone()).unwrap();
            assert_eq!(identity.client(&c.id).unwrap().permissions, PERMISSION_USER);

            c.public_key = [9u8; 32];
            assert!(identity.upsert_client(c).is_err());
            assert_eq!(identity.clients.len(), 1);
        }

        #[test]
        fn removing_last_admin_clears_all() {
            let mut identity = ServerIdentity::generate(DeviceId::random());
            let admin = client(PERMISSION_ADMIN);
            identity.upsert_client(admin.clone()).unwrap();
            identity.upsert_client(client(PERMISSION_USER)).unwrap();

            assert_eq!(identity.remove_client(&admin.id), Some(admin));
            assert!(identity.clients.is_empty());
        }

        #[test]
        fn remove_unknown_is_none() {
            let mut identity = ServerIdentity::generate(DeviceId::random());
            assert!(identity.remove_client(&Uuid::new_v4()).is_none());
        }
    }

    mod serialization {
        use super::*;

        #[test]
        fn json_roundtrip() {
            let mut identity = ServerIdentity::generate(DeviceId([1, 2, 3, 4, 5, 6]));
            identity.upsert_client(client(PERMISSION_ADMIN)).unwrap();

            let json = identity.to_json().unwrap();
            assert!(json.contains("01:02:03:04:05:06"));

            let restored = ServerIdentity::from_json(&json).unwrap();
            assert_eq!(restored.device_id, identity.device_id);
            assert_eq!(restored.public_key(), identity.public_key());
            assert_eq!(restored.clients, identity.clients);
        }

        #[test]
        fn keys_are_hex_encoded() {
            let mut identity = ServerIdentity::generate(DeviceId::random());
            let c = client(PERMISSION_ADMIN);
            identity.upsert_client(c.clone()).unwrap();

            let json = identity.to_json().unwrap();
            assert!(json.contains(&hex::encode(c.public_key)));
            assert!(json.contains(&hex::encode(identity.keypair.seed())));
        }

        #[test]
        fn rejects_bad_seed() {
            let json = r#"{"device_id":"01:02:03:04:05:06","seed":"zz","clients":[]}"#;
            assert!(ServerIdentity::from_json(json).is_err());
        }

        #[test]
        fn missing_clients_default_to_empty() {
            let json = format!(
                r#"{{"device_id":"01:02:03:04:05:06","seed":"{}"}}"#,
                hex::encode([7u8; 32])
            );
            let identity = ServerIdentity::from_json(&json).unwrap();
            assert!(identity.clients.is_empty());
        }
    }
}
