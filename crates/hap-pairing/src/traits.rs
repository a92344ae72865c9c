//! Storage seam for the accessory's pairing state.

use crate::identity::ServerIdentity;
use async_trait::async_trait;
use hap_core::error::Result;

/// Persistence for [`ServerIdentity`].
///
/// Saves happen after every change to the controller list, so an
/// implementation should write atomically enough that a crash leaves either
/// the old or the new state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PairingStore: Send + Sync {
    /// Load the stored identity, or `None` if nothing has been saved yet.
    async fn load(&self) -> Result<Option<ServerIdentity>>;

    /// Replace the stored identity.
    async fn save(&self, identity: &ServerIdentity) -> Result<()>;
}
