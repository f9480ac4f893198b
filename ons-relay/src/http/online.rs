//! Presence query endpoint.
//!
//! `GET /api/online?ids=a,b` reports, per id, whether the device is
//! registered and whether a client is paired with it. Without `ids` the
//! owner's devices from the directory are checked instead.

use crate::directory::ADMIN_OWNER;
use crate::server::{Presence, SignalingRelay};
use axum::extract::Query;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Devices listed when no ids are given.
const DEFAULT_PAGE_SIZE: u32 = 5;

/// Query parameters.
#[derive(Debug, Deserialize)]
pub struct OnlineQuery {
    /// Comma-separated device ids.
    pub ids: Option<String>,
    /// Owner whose devices to check when `ids` is absent.
    pub owner: Option<i64>,
    /// 1-based page of the owner's devices.
    pub page: Option<u32>,
}

/// Presence per device id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OnlineResponse {
    /// Device id -> a device connection is registered.
    pub online: BTreeMap<String, bool>,
    /// Device id -> a client is paired with it.
    pub connect: BTreeMap<String, bool>,
}

impl OnlineResponse {
    fn from_presence(status: BTreeMap<String, Presence>) -> Self {
        let mut online = BTreeMap::new();
        let mut connect = BTreeMap::new();
        for (id, presence) in status {
            online.insert(id.clone(), presence.device);
            connect.insert(id, presence.client);
        }
        Self { online, connect }
    }
}

/// Presence handler.
pub async fn online_handler(
    Extension(relay): Extension<Arc<SignalingRelay>>,
    Query(query): Query<OnlineQuery>,
) -> Result<Json<OnlineResponse>, (StatusCode, String)> {
    let ids: Vec<String> = match query.ids {
        Some(ids) => ids
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect(),
        None => {
            let owner = query.owner.unwrap_or(ADMIN_OWNER);
            let page = query.page.unwrap_or(1);
            relay
                .directory()
                .list_devices(owner, page, DEFAULT_PAGE_SIZE)
                .await
                .map_err(|e| {
                    tracing::warn!("device listing failed: {}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "directory unavailable".to_string())
                })?
                .into_iter()
                .map(|device| device.device_id)
                .collect()
        }
    };

    Ok(Json(OnlineResponse::from_presence(relay.check_online(ids.as_slice()))))
}
