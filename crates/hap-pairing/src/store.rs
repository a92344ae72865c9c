//! [`PairingStore`] implementations.

use crate::identity::ServerIdentity;
use crate::traits::PairingStore;
use async_trait::async_trait;
use hap_core::error::Result;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// JSON file store.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PairingStore for FileStore {
    async fn load(&self) -> Result<Option<ServerIdentity>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                debug!(path = %self.path.display(), "loaded pairing state");
                ServerIdentity::from_json(&content).map(Some)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, identity: &ServerIdentity) -> Result<()> {
        let json = identity.to_json()?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write beside the target, then swap it in.
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), clients = identity.clients.len(), "saved pairing state");
        Ok(())
    }
}

/// In-memory store for tests and ephemeral accessories.
#[derive(Default)]
pub struct MemoryStore {
    saved: Mutex<Option<ServerIdentity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: ServerIdentity) -> Self {
        Self {
            saved: Mutex::new(Some(identity)),
        }
    }
}

#[async_trait]
impl PairingStore for MemoryStore {
    async fn load(&self) -> Result<Option<ServerIdentity>> {
        Ok(self.saved.lock().await.clone())
    }

    async fn save(&self, identity: &ServerIdentity) -> Result<()> {
        *self.saved.lock().await = Some(identity.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{PairedClient, PERMISSION_ADMIN};
    use hap_core::DeviceId;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn identity_with_client() -> ServerIdentity {
        let mut identity = ServerIdentity::generate(DeviceId([0xAA, 0xBB, 0xCC, 0x00, 0x11, 0x22]));
        identity
            .upsert_client(PairedClient::new(Uuid::new_v4(), [3u8; 32], PERMISSION_ADMIN))
            .unwrap();
        identity
    }

    mod file_store {
        use super::*;

        #[tokio::test]
        async fn missing_file_loads_none() {
            let dir = tempdir().unwrap();
            let store = FileStore::new(dir.path().join("pairings.json"));
            assert!(store.load().await.unwrap().is_none());
        }

        #[tokio::test]
        async fn save_and_load_roundtrip() {
            let dir = tempdir().unwrap();
            let store = FileStore::new(dir.path().join("state").join("pairings.json"));
            let identity = identity_with_client();

            store.save(&identity).await.unwrap();
            let loaded = store.load().await.unwrap().unwrap();

            assert_eq!(loaded.device_id, identity.device_id);
            assert_eq!(loaded.public_key(), identity.public_key());
            assert_eq!(loaded.clients, identity.clients);
            assert!(!store.path().with_extension("tmp").exists());
        }

        #[tokio::test]
        async fn corrupt_file_is_an_error() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("pairings.json");
            std::fs::write(&path, "{ not json").unwrap();

            assert!(FileStore::new(path).load().await.is_err());
        }
    }

    mod memory_store {
        use super::*;

        #[tokio::test]
        async fn starts_empty() {
            assert!(MemoryStore::new().load().await.unwrap().is_none());
        }

        #[tokio::test]
        async fn save_replaces_state() {
            let store = MemoryStore::with_identity(ServerIdentity::generate(DeviceId::random()));
            let identity = identity_with_client();
            store.save(&identity).await.unwrap();

            let loaded = store.load().await.unwrap().unwrap();
            assert_eq!(loaded.clients.len(), 1);
            assert_eq!(loaded.device_id, identity.device_id);
        }
    }
}
