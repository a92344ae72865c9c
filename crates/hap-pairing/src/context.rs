//! Pairing state shared by every connection of one accessory.

use crate::identity::{PairedClient, ServerIdentity};
use crate::traits::PairingStore;
use hap_core::error::{PairingError, Result};
use hap_core::{DeviceId, SetupCode};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::info;
use uuid::Uuid;

/// Accessory identity, setup code and controller list.
///
/// The device id and signing key never change after construction. The
/// controller list sits behind a lock and is saved through the store on
/// every change.
pub struct PairingContext {
    device_id: DeviceId,
    keypair: hap_crypto::ed25519::IdentityKeyPair,
    clients: RwLock<Vec<PairedClient>>,
    store: Arc<dyn PairingStore>,
    setup_code: SetupCode,
    paired_tx: watch::Sender<bool>,
}

impl PairingContext {
    pub fn new(identity: ServerIdentity, store: Arc<dyn PairingStore>, setup_code: SetupCode) -> Self {
        let (paired_tx, _) = watch::channel(identity.is_paired());
        Self {
            device_id: identity.device_id,
            keypair: identity.keypair,
            clients: RwLock::new(identity.clients),
            store,
            setup_code,
            paired_tx,
        }
    }

    /// Load the stored identity, or create and save a new one.
    ///
    /// `device_id` only applies to a newly created identity.
    pub async fn load_or_create(
        store: Arc<dyn PairingStore>,
        setup_code: SetupCode,
        device_id: Option<DeviceId>,
    ) -> Result<Self> {
        let identity = match store.load().await? {
            Some(identity) => identity,
            None => {
                let identity = ServerIdentity::generate(device_id.unwrap_or_else(DeviceId::random));
                store.save(&identity).await?;
                info!(device_id = %identity.device_id, "created accessory identity");
                identity
            }
        };
        Ok(Self::new(identity, store, setup_code))
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Accessory pairing identifier used in signed transcripts.
    pub fn pairing_id(&self) -> String {
        self.device_id.to_mac_string()
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_key()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.keypair.sign(message)
    }

    pub fn setup_code(&self) -> &SetupCode {
        &self.setup_code
    }

    pub async fn is_paired(&self) -> bool {
        self.clients.read().await.iter().any(PairedClient::is_admin)
    }

    /// Watch the paired flag, e.g. to refresh the advertisement.
    pub fn paired_changes(&self) -> watch::Receiver<bool> {
        self.paired_tx.subscribe()
    }

    pub async fn client(&self, id: &Uuid) -> Option<PairedClient> {
        self.clients.read().await.iter().find(|c| c.id == *id).cloned()
    }

    pub async fn clients(&self) -> Vec<PairedClient> {
        self.clients.read().await.clone()
    }

    /// Add or update a controller and persist the result.
    pub async fn upsert_client(&self, client: PairedClient) -> Result<()> {
        self.modify(|identity| identity.upsert_client(client)).await
    }

    /// Pair `client` as the first admin and persist the result.
    ///
    /// Fails with `AlreadyPaired` if an admin exists by the time the write
    /// lock is taken, so only one of several concurrent setups can succeed.
    pub async fn add_first_admin(&self, client: PairedClient) -> Result<()> {
        self.modify(|identity| {
            if identity.is_paired() {
                return Err(PairingError::AlreadyPaired.into());
            }
            identity.upsert_client(client)
        })
        .await
    }

    /// Remove a controller and persist the result.
    pub async fn remove_client(&self, id: &Uuid) -> Result<Option<PairedClient>> {
        self.modify(|identity| Ok(identity.remove_client(id))).await
    }

    /// Snapshot in the persisted form.
    pub async fn snapshot(&self) -> ServerIdentity {
        ServerIdentity {
            device_id: self.device_id,
            keypair: self.keypair.clone(),
            clients: self.clients.read().await.clone(),
        }
    }

    /// Apply `change` to a copy, save it, then publish it.
    ///
    /// The write lock is held across the save so concurrent changes are
    /// persisted in order. A failed save leaves the in-memory list untouched.
    async fn modify<T>(
        &self,
        change: impl FnOnce(&mut ServerIdentity) -> Result<T>,
    ) -> Result<T> {
        let mut clients = self.clients.write().await;
        let mut identity = ServerIdentity {
            device_id: self.device_id,
            keypair: self.keypair.clone(),
            clients: clients.clone(),
        };

        let out = change(&mut identity)?;
        self.store.save(&identity).await?;

        *clients = identity.clients;
        let paired = clients.iter().any(PairedClient::is_admin);
        self.paired_tx.send_if_modified(|current| {
            let changed = *current != paired;
            *current = paired;
            changed
        });
        Ok(out)
    }
}
