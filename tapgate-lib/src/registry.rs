//! Key registry client and cache
//!
//! Fetches public-key records from the external agent registry by key
//! id, with a bounded, time-expiring in-memory cache. Misses are never
//! cached: a key that does not exist yet may exist on the next deploy.

use crate::error::{GatewayError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// How long a registry fetch may take before it counts as unavailable.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Public-key record as served by the registry.
///
/// The `agent_*` and `description` fields are descriptive only and are
/// never interpreted; they exist for log lines.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyRecord {
    pub key_id: String,
    pub algorithm: String,
    /// Tri-valued as received; only the literal `"true"` counts as active
    pub is_active: String,
    /// PEM SPKI block (RSA) or base64 of 32 raw bytes (Ed25519)
    pub public_key: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub agent_id: Option<i64>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub agent_domain: Option<String>,
}

impl KeyRecord {
    /// Whether this key may be used for verification.
    pub fn is_active(&self) -> bool {
        self.is_active == "true"
    }
}

struct CacheEntry {
    record: KeyRecord,
    inserted_at: Instant,
}

/// Registry client with a TTL-bounded cache.
///
/// The cache is process-local; coherence across gateway instances is
/// intentionally eventual, bounded by the TTL. Concurrent misses for
/// the same key may each fetch independently.
pub struct KeyRegistry {
    base_url: String,
    ttl: Duration,
    client: reqwest::Client,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl KeyRegistry {
    /// Create a registry client for the given base URL.
    pub fn new(base_url: impl Into<String>, ttl: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into(),
            ttl,
            client,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Look up a key record, serving from cache when fresh.
    ///
    /// Performs at most one outbound fetch per call.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` for a 404 or any other non-2xx registry status;
    /// `RegistryUnavailable` for transport failures or a body that does
    /// not parse as a key record.
    pub async fn get(&self, key_id: &str) -> Result<KeyRecord> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(key_id) {
                if entry.inserted_at.elapsed() <= self.ttl {
                    debug!(key_id = %key_id, "key cache hit");
                    return Ok(entry.record.clone());
                }
            }
        }
        // Stale entries are evicted on access; there is no background sweep
        self.cache.write().await.remove(key_id);

        let url = format!("{}/keys/{}", self.base_url.trim_end_matches('/'), key_id);
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| GatewayError::RegistryUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            debug!(key_id = %key_id, status = %response.status(), "registry returned no key");
            return Err(GatewayError::KeyNotFound(key_id.to_string()));
        }

        let record: KeyRecord = response
            .json()
            .await
            .map_err(|e| GatewayError::RegistryUnavailable(e.to_string()))?;

        self.cache.write().await.insert(
            key_id.to_string(),
            CacheEntry {
                record: record.clone(),
                inserted_at: Instant::now(),
            },
        );
        Ok(record)
    }

    /// Number of cached records, stale entries included.
    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct StubState {
        hits: Arc<AtomicUsize>,
        body: Arc<serde_json::Value>,
        status: StatusCode,
    }

    async fn serve_key(
        State(state): State<StubState>,
        Path(_key_id): Path<String>,
    ) -> impl IntoResponse {
        state.hits.fetch_add(1, Ordering::SeqCst);
        (state.status, Json(state.body.as_ref().clone()))
    }

    async fn spawn_registry(status: StatusCode, body: serde_json::Value) -> (SocketAddr, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = StubState {
            hits: Arc::clone(&hits),
            body: Arc::new(body),
            status,
        };
        let app = Router::new()
            .route("/keys/:key_id", get(serve_key))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind registry stub");
        let addr = listener.local_addr().expect("registry stub addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve registry stub");
        });
        (addr, hits)
    }

    fn sample_record() -> serde_json::Value {
        serde_json::json!({
            "key_id": "agent-key-1",
            "algorithm": "ed25519",
            "is_active": "true",
            "public_key": "AAAA",
            "description": "test key",
            "agent_id": 7,
            "agent_name": "Shopper",
            "agent_domain": "agent.example.com"
        })
    }

    #[tokio::test]
    async fn test_fetch_and_cache_within_ttl() {
        let (addr, hits) = spawn_registry(StatusCode::OK, sample_record()).await;
        let registry =
            KeyRegistry::new(format!("http://{}", addr), Duration::from_secs(60)).expect("client");

        let first = registry.get("agent-key-1").await.expect("first fetch");
        assert_eq!(first.key_id, "agent-key-1");
        assert!(first.is_active());

        let second = registry.get("agent-key-1").await.expect("cached fetch");
        assert_eq!(second.agent_name.as_deref(), Some("Shopper"));
        assert_eq!(hits.load(Ordering::SeqCst), 1, "second call must hit the cache");
    }

    #[tokio::test]
    async fn test_stale_entry_refetched() {
        let (addr, hits) = spawn_registry(StatusCode::OK, sample_record()).await;
        let registry =
            KeyRegistry::new(format!("http://{}", addr), Duration::ZERO).expect("client");

        registry.get("agent-key-1").await.expect("first fetch");
        registry.get("agent-key-1").await.expect("refetch");
        assert_eq!(hits.load(Ordering::SeqCst), 2, "zero TTL must refetch");
    }

    #[tokio::test]
    async fn test_not_found_is_not_cached() {
        let (addr, hits) = spawn_registry(StatusCode::NOT_FOUND, serde_json::json!({})).await;
        let registry =
            KeyRegistry::new(format!("http://{}", addr), Duration::from_secs(60)).expect("client");

        for _ in 0..2 {
            let err = registry.get("ghost").await.unwrap_err();
            assert!(matches!(err, GatewayError::KeyNotFound(_)));
        }
        assert_eq!(registry.cached_len().await, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 2, "misses must not be cached");
    }

    #[tokio::test]
    async fn test_server_error_maps_to_not_found() {
        // Any non-2xx means the registry has no usable record
        let (addr, _) = spawn_registry(StatusCode::BAD_GATEWAY, serde_json::json!({})).await;
        let registry =
            KeyRegistry::new(format!("http://{}", addr), Duration::from_secs(60)).expect("client");
        let err = registry.get("agent-key-1").await.unwrap_err();
        assert!(matches!(err, GatewayError::KeyNotFound(_)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_unavailable() {
        let (addr, _) = spawn_registry(StatusCode::OK, serde_json::json!({"nope": true})).await;
        let registry =
            KeyRegistry::new(format!("http://{}", addr), Duration::from_secs(60)).expect("client");
        let err = registry.get("agent-key-1").await.unwrap_err();
        assert!(matches!(err, GatewayError::RegistryUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_unavailable() {
        // Bind-then-drop guarantees nothing is listening on the port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind probe");
        let addr = listener.local_addr().expect("probe addr");
        drop(listener);

        let registry =
            KeyRegistry::new(format!("http://{}", addr), Duration::from_secs(60)).expect("client");
        let err = registry.get("agent-key-1").await.unwrap_err();
        assert!(matches!(err, GatewayError::RegistryUnavailable(_)));
    }

    #[test]
    fn test_is_active_requires_literal_true() {
        let mut record: KeyRecord =
            serde_json::from_value(sample_record()).expect("deserialize record");
        assert!(record.is_active());
        record.is_active = "false".to_string();
        assert!(!record.is_active());
        record.is_active = "TRUE".to_string();
        assert!(!record.is_active());
        record.is_active = "yes".to_string();
        assert!(!record.is_active());
    }
}
