// Thin HTTP client over the running parkcore-server's ops endpoints, plus
// a direct Redis connection for lease inspection. Unlike the JSON-RPC
// daemon client this core's teacher ships, parkcore-server is a plain
// HTTP service, so this client is a bare `reqwest` wrapper rather than a
// framed request/response protocol.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

const DEFAULT_TIMEOUT_SECS: u64 = 5;

pub struct OpsClient {
    base_url: String,
    http: reqwest::Client,
}

impl OpsClient {
    pub fn new(base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("reqwest client should build");
        Self { base_url: base_url.trim_end_matches('/').to_string(), http }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<(u16, T)> {
        let url = format!("{}{path}", self.base_url);
        let response = self.http.get(&url).send().await.with_context(|| format!("failed to reach {url}"))?;
        let status = response.status().as_u16();
        let body = response.json::<T>().await.with_context(|| format!("failed to parse response body from {url}"))?;
        Ok((status, body))
    }
}

/// Reads the `(guard key, metadata)` pair for a spot/date directly from
/// Redis, using the same key scheme as `parkcore_core::lease::manager`
/// (`lease_guard_key`/`lease_metadata_key`). The CLI talks to Redis over
/// the wire rather than through the in-process `CoordinationCache` trait,
/// so the key format is duplicated here rather than imported.
pub async fn inspect_lease(redis_url: &str, spot_id: uuid::Uuid, date: chrono::NaiveDate) -> Result<LeaseInspection> {
    let client = redis::Client::open(redis_url).context("invalid redis url")?;
    let mut connection = client.get_multiplexed_async_connection().await.context("failed to connect to redis")?;

    let guard_key = parkcore_common::lease_guard_key(spot_id, date);
    let reservation_id: Option<String> = redis::AsyncCommands::get(&mut connection, &guard_key).await.context("GET failed")?;
    let ttl_seconds: i64 = redis::AsyncCommands::ttl(&mut connection, &guard_key).await.unwrap_or(-2);

    let metadata_json: Option<String> = match &reservation_id {
        Some(id) => {
            let reservation_id = uuid::Uuid::parse_str(id).context("guard key held a non-uuid value")?;
            let metadata_key = parkcore_common::lease_metadata_key(reservation_id);
            redis::AsyncCommands::get(&mut connection, &metadata_key).await.context("GET failed")?
        }
        None => None,
    };

    Ok(LeaseInspection { guard_key, held: reservation_id, ttl_seconds, metadata_json })
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LeaseInspection {
    pub guard_key: String,
    pub held: Option<String>,
    pub ttl_seconds: i64,
    pub metadata_json: Option<String>,
}
