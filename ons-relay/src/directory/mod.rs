//! Device directory for ons-relay.
//!
//! The directory knows which device ids exist, who owns them and when they
//! were last seen. The relay only consults it for optional registration
//! checks and for last-online / last-connect bookkeeping.

mod sqlite;

pub use sqlite::SqliteDirectory;

use crate::error::DirectoryError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Owner id that sees every device when listing.
pub const ADMIN_OWNER: i64 = 1;

/// A device known to the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    /// Row id.
    pub id: i64,
    /// Owning account.
    pub owner: i64,
    /// Id the device registers with on the relay.
    pub device_id: String,
    /// Human-readable name.
    pub name: String,
    /// Unix milliseconds of the last registration (0 if never).
    pub last_online: i64,
    /// Unix milliseconds of the last client pairing request (0 if never).
    pub last_connect: i64,
}

/// Trait for device directory backends.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Look up a device by row id.
    async fn get_device_by_id(&self, id: i64) -> Result<Option<Device>, DirectoryError>;

    /// Look up a device by the id it registers with.
    async fn get_device_by_device_id(
        &self,
        device_id: &str,
    ) -> Result<Option<Device>, DirectoryError>;

    /// Record that `device_id` registered now.
    ///
    /// Returns `false` if the directory has no such device.
    async fn update_last_online(&self, device_id: &str) -> Result<bool, DirectoryError>;

    /// Record that a client asked for `device_id` now.
    ///
    /// Returns `false` if the directory has no such device.
    async fn update_last_connect(&self, device_id: &str) -> Result<bool, DirectoryError>;

    /// List devices, newest first.
    ///
    /// `owner` of [`ADMIN_OWNER`] lists every device. `page` is 1-based; a
    /// page of 0 is treated as 1.
    async fn list_devices(
        &self,
        owner: i64,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Device>, DirectoryError>;

    /// Add a device and return it.
    async fn add_device(
        &self,
        owner: i64,
        name: &str,
        device_id: &str,
    ) -> Result<Device, DirectoryError>;
}

/// Current Unix time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
