//! API Handlers
//!
//! HTTP request handlers for the demo service. The two lock endpoints show
//! how a caller guards recomputation: in-process per key, or across
//! processes through the distributed lock.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::{info, warn};

use crate::cache::{Cache, CacheAside};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::lock::{LockManager, LockOptions};
use crate::models::{
    validate_key, DeleteResponse, ExistsResponse, FillResponse, GetResponse, HealthResponse,
    LockResponse, SetRequest, SetResponse, StatsResponse,
};
use crate::store::KeyValueStore;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Cache plus the locks guarding its recomputation
    pub aside: CacheAside,
    /// Options for the distributed lock endpoint
    pub lock_options: LockOptions,
}

impl AppState {
    /// Creates state over `store` with default settings.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let cache = Cache::new(store.clone());
        let locks = LockManager::new(store);
        Self {
            aside: CacheAside::new(cache, locks),
            lock_options: LockOptions::new(10, Duration::from_secs(5)),
        }
    }

    /// Creates state over `store` with settings from the Config.
    pub fn from_config(store: Arc<dyn KeyValueStore>, config: &Config) -> Self {
        let cache = Cache::from_config(store.clone(), config);
        let locks = LockManager::from_config(store, config);
        Self {
            aside: CacheAside::from_config(cache, locks, config),
            lock_options: LockOptions::new(10, Duration::from_secs(5)),
        }
    }

    pub fn cache(&self) -> &Cache {
        self.aside.cache()
    }

    pub fn locks(&self) -> &LockManager {
        self.aside.locks()
    }
}

/// Stand-in for the authoritative data source behind the cache.
async fn load_from_source(key: &str) -> Result<String> {
    Ok(format!("Select * From DbTable Where Key = '{key}'"))
}

fn check_key(key: &str) -> Result<()> {
    match validate_key(key) {
        Some(msg) => Err(CacheError::InvalidRequest(msg)),
        None => Ok(()),
    }
}

/// Handler for PUT /set
///
/// Stores a value without expiry, with a sliding TTL, or until a jittered
/// deadline.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let cache = state.cache();
    let written = match (req.ttl, req.expire_at) {
        (Some(ttl), _) => cache.insert_with_ttl(&req.key, &req.value, ttl).await,
        (None, Some(deadline)) => cache.insert_until(&req.key, &req.value, deadline).await,
        (None, None) => cache.insert(&req.key, &req.value).await,
    };

    if !written {
        return Err(CacheError::Transport(format!(
            "value for '{}' was not cached",
            req.key
        )));
    }
    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for GET /get/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    let value = state
        .cache()
        .get_value(&key)
        .await
        .ok_or_else(|| CacheError::NotFound(key.clone()))?;

    Ok(Json(GetResponse::new(key, value)))
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    if !state.cache().remove(&key).await {
        return Err(CacheError::Transport(format!("could not delete '{key}'")));
    }
    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for GET /exists/:key
pub async fn exists_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<ExistsResponse> {
    let exists = state.cache().exists(&key).await;
    Json(ExistsResponse { key, exists })
}

/// Handler for GET /standalone-lock/:key
///
/// Cache-aside read where only one request per key recomputes on a miss.
pub async fn standalone_lock_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<FillResponse>> {
    check_key(&key)?;
    let source_key = key.as_str();
    let value = state
        .aside
        .get_or_load(&key, None, move || load_from_source(source_key))
        .await?;
    Ok(Json(FillResponse { key, value }))
}

/// Handler for GET /distributed-lock/:name
///
/// Takes the named lock (10 s expiry, up to 5 s wait), runs the guarded
/// work and always releases. Answers "success", "nolock", or "fail" when
/// the lock store is unreachable.
pub async fn distributed_lock_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<LockResponse>> {
    check_key(&name)?;
    let lock_name = name.as_str();
    let outcome = state
        .locks()
        .with_lock(lock_name, state.lock_options, move || async move {
            info!(lock = lock_name, "running guarded work");
        })
        .await;

    let status = match outcome {
        Ok(Some(())) => "success",
        Ok(None) => "nolock",
        Err(err) => {
            warn!(lock = %name, error = %err, "distributed lock failed");
            "fail"
        }
    };
    Ok(Json(LockResponse::new(name, status)))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.cache().stats()))
}

/// Handler for GET /health
///
/// Reports "degraded" rather than failing when the store is unreachable,
/// since the service keeps working without its cache.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = state.cache().store();
    let reachable = store.ping().await.is_ok();
    Json(HealthResponse::new(store.name(), reachable))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn memory_state() -> (Arc<MemoryStore>, AppState) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), AppState::new(store))
    }

    #[tokio::test]
    async fn test_set_and_get_handler() {
        let (_, state) = memory_state();

        let req = SetRequest {
            key: "test_key".to_string(),
            value: serde_json::json!({"temp": 21}),
            ttl: Some(60),
            expire_at: None,
        };
        let result = set_handler(State(state.clone()), Json(req)).await;
        assert!(result.is_ok());

        let response = get_handler(State(state), Path("test_key".to_string()))
            .await
            .unwrap();
        assert_eq!(response.value["temp"], 21);
    }

    #[tokio::test]
    async fn test_get_nonexistent_key() {
        let (_, state) = memory_state();
        let result = get_handler(State(state), Path("nonexistent".to_string())).await;
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_set_invalid_request() {
        let (_, state) = memory_state();
        let req = SetRequest {
            key: "".to_string(),
            value: serde_json::json!("value"),
            ttl: None,
            expire_at: None,
        };
        let result = set_handler(State(state), Json(req)).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_set_while_store_down() {
        let (store, state) = memory_state();
        store.set_available(false);
        let req = SetRequest {
            key: "k".to_string(),
            value: serde_json::json!("value"),
            ttl: None,
            expire_at: None,
        };
        let result = set_handler(State(state), Json(req)).await;
        assert!(matches!(result, Err(CacheError::Transport(_))));
    }

    #[tokio::test]
    async fn test_standalone_lock_fills_cache() {
        let (_, state) = memory_state();

        let response = standalone_lock_handler(State(state.clone()), Path("report".to_string()))
            .await
            .unwrap();
        assert!(response.value.contains("report"));
        assert!(state.cache().exists("report").await);
    }

    #[tokio::test]
    async fn test_distributed_lock_success_then_released() {
        let (_, state) = memory_state();

        let response = distributed_lock_handler(State(state.clone()), Path("LockKey".to_string()))
            .await
            .unwrap();
        assert_eq!(response.status, "success");
        assert!(!state.locks().is_locked("LockKey").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_distributed_lock_busy() {
        let (_, state) = memory_state();
        let _held = state.locks().try_acquire("LockKey").await.unwrap().unwrap();

        let response = distributed_lock_handler(State(state), Path("LockKey".to_string()))
            .await
            .unwrap();
        assert_eq!(response.status, "nolock");
    }

    #[tokio::test]
    async fn test_distributed_lock_store_down() {
        let (store, state) = memory_state();
        store.set_available(false);

        let response = distributed_lock_handler(State(state), Path("LockKey".to_string()))
            .await
            .unwrap();
        assert_eq!(response.status, "fail");
    }

    #[tokio::test]
    async fn test_health_handler() {
        let (store, state) = memory_state();
        assert_eq!(health_handler(State(state.clone())).await.status, "healthy");

        store.set_available(false);
        assert_eq!(health_handler(State(state)).await.status, "degraded");
    }
}
