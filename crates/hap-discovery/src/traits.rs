//! Trait definitions for announcing the accessory (enables mocking in tests).

use async_trait::async_trait;
use hap_core::Result;

/// Something that can push the accessory's announcements onto the network.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Announcer: Send + Sync {
    /// Send all current announcements. Returns how many packets went out.
    async fn announce(&self) -> Result<usize>;
}
