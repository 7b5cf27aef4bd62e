//! HTTP routes exposing published resources.
//!
//! ```text
//! GET    /resources                 list published names
//! GET    /resources/{name}          describe one resource (lookup)
//! POST   /queues/{name}/put         enqueue a JSON item
//! POST   /queues/{name}/get         dequeue, waiting up to timeout_ms
//! GET    /queues/{name}/len         occupancy
//! POST   /queues/{name}/wait        wait_until_below
//! GET    /tables/{name}             all entries
//! GET    /tables/{name}/len         entry count
//! POST   /tables/{name}/get|set|remove
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::server::auth::{authkey_middleware, AuthKey};
use crate::server::protocol::{
    KeyRequest, PopRequest, QueueLen, ResourceInfo, SetRequest, WaitRequest, WaitResponse,
    MAX_REMOTE_WAIT_MS,
};
use crate::server::registry::Registry;

/// Build the router with authentication and tracing layers.
pub fn build_router(registry: Arc<Registry>, key: AuthKey) -> Router {
    Router::new()
        .route("/resources", get(list_resources))
        .route("/resources/{name}", get(describe_resource))
        .route("/queues/{name}/put", post(queue_put))
        .route("/queues/{name}/get", post(queue_get))
        .route("/queues/{name}/len", get(queue_len))
        .route("/queues/{name}/wait", post(queue_wait))
        .route("/tables/{name}", get(table_items))
        .route("/tables/{name}/len", get(table_len))
        .route("/tables/{name}/get", post(table_get))
        .route("/tables/{name}/set", post(table_set))
        .route("/tables/{name}/remove", post(table_remove))
        .with_state(registry)
        .layer(middleware::from_fn_with_state(key, authkey_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn list_resources(
    State(registry): State<Arc<Registry>>,
) -> CoordinatorResult<Json<Vec<ResourceInfo>>> {
    let resources = registry
        .resources()?
        .into_iter()
        .map(|(name, kind)| ResourceInfo { name, kind })
        .collect();
    Ok(Json(resources))
}

async fn describe_resource(
    State(registry): State<Arc<Registry>>,
    Path(name): Path<String>,
) -> CoordinatorResult<Json<ResourceInfo>> {
    let kind = registry.describe(&name)?;
    Ok(Json(ResourceInfo { name, kind }))
}

async fn queue_put(
    State(registry): State<Arc<Registry>>,
    Path(name): Path<String>,
    Json(item): Json<serde_json::Value>,
) -> CoordinatorResult<Json<QueueLen>> {
    let queue = registry.lookup_queue(&name)?;
    queue.enqueue(item);
    Ok(Json(QueueLen { len: queue.len() }))
}

async fn queue_get(
    State(registry): State<Arc<Registry>>,
    Path(name): Path<String>,
    Json(request): Json<PopRequest>,
) -> CoordinatorResult<Json<serde_json::Value>> {
    let queue = registry.lookup_queue(&name)?;
    let wait = request
        .timeout_ms
        .unwrap_or(MAX_REMOTE_WAIT_MS)
        .min(MAX_REMOTE_WAIT_MS);
    // Async wait: a client that gives up drops this future before anything is popped.
    let item = queue.dequeue_async(Duration::from_millis(wait)).await?;

    Ok(Json(item))
}

async fn queue_len(
    State(registry): State<Arc<Registry>>,
    Path(name): Path<String>,
) -> CoordinatorResult<Json<QueueLen>> {
    let queue = registry.lookup_queue(&name)?;
    Ok(Json(QueueLen { len: queue.len() }))
}

async fn queue_wait(
    State(registry): State<Arc<Registry>>,
    Path(name): Path<String>,
    Json(request): Json<WaitRequest>,
) -> CoordinatorResult<Json<WaitResponse>> {
    let queue = registry.lookup_queue(&name)?;

    // Unbounded or long waits are served in slices; the client repeats on `Full`.
    let cap = MAX_REMOTE_WAIT_MS as f64 / 1000.0;
    let timeout = match request.timeout_secs {
        Some(secs) if secs < 0.0 => Some(secs),
        Some(secs) => Some(secs.min(cap)),
        None => Some(cap),
    };

    let waited = tokio::task::spawn_blocking(move || {
        queue.wait_until_below(request.threshold, timeout)
    })
    .await
    .map_err(|e| CoordinatorError::Protocol(format!("wait task failed: {}", e)))??;

    Ok(Json(WaitResponse {
        waited_secs: waited.as_secs_f64(),
    }))
}

async fn table_items(
    State(registry): State<Arc<Registry>>,
    Path(name): Path<String>,
) -> CoordinatorResult<Json<serde_json::Map<String, serde_json::Value>>> {
    let table = registry.lookup_table(&name)?;
    let items = table
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();
    Ok(Json(items))
}

async fn table_len(
    State(registry): State<Arc<Registry>>,
    Path(name): Path<String>,
) -> CoordinatorResult<Json<QueueLen>> {
    let table = registry.lookup_table(&name)?;
    Ok(Json(QueueLen { len: table.len() }))
}

async fn table_get(
    State(registry): State<Arc<Registry>>,
    Path(name): Path<String>,
    Json(request): Json<KeyRequest>,
) -> CoordinatorResult<Json<Option<serde_json::Value>>> {
    let table = registry.lookup_table(&name)?;
    let value = table.get(&request.key).map(|entry| entry.value().clone());
    Ok(Json(value))
}

async fn table_set(
    State(registry): State<Arc<Registry>>,
    Path(name): Path<String>,
    Json(request): Json<SetRequest>,
) -> CoordinatorResult<Json<Option<serde_json::Value>>> {
    let table = registry.lookup_table(&name)?;
    Ok(Json(table.insert(request.key, request.value)))
}

async fn table_remove(
    State(registry): State<Arc<Registry>>,
    Path(name): Path<String>,
    Json(request): Json<KeyRequest>,
) -> CoordinatorResult<Json<Option<serde_json::Value>>> {
    let table = registry.lookup_table(&name)?;
    Ok(Json(table.remove(&request.key).map(|(_, value)| value)))
}
