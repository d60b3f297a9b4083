//! Status HTTP server
//!
//! Exposes provider health and router metrics for operators and container
//! orchestration platforms.

use crate::health::ProviderHealthSnapshot;
use crate::router::LlmRouter;
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};
use warp::http::StatusCode;
use warp::Filter;

/// HTTP status server for one router instance
pub struct StatusServer {
    router: LlmRouter,
    bind: SocketAddr,
}

impl StatusServer {
    pub fn new(router: LlmRouter, bind: SocketAddr) -> Self {
        Self { router, bind }
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<(), warp::Error>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let (addr, server) = warp::serve(routes(self.router))
            .try_bind_with_graceful_shutdown(self.bind, shutdown)?;
        tracing::info!(bind = %addr, "Status server listening");
        server.await;
        Ok(())
    }
}

/// `GET /health`, `GET /metrics` and `GET /`
pub fn routes(
    router: LlmRouter,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let health_router = router.clone();
    let health_route = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(move || {
            let router = health_router.clone();
            async move {
                let status = health_status(&router);
                let code = if status.status == "healthy" {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&status), code))
            }
        });

    let metrics_router = router;
    let metrics_route = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(move || {
            let router = metrics_router.clone();
            async move { Ok::<_, Infallible>(warp::reply::json(&router.metrics().snapshot())) }
        });

    let root_route = warp::path::end().and(warp::get()).map(|| {
        let mut endpoints = BTreeMap::new();
        endpoints.insert("/health", "Per-provider health; 503 when no enabled provider is healthy");
        endpoints.insert("/metrics", "Router request, stream and provider statistics");
        warp::reply::json(&ApiDocumentationResponse { endpoints })
    });

    health_route.or(metrics_route).or(root_route)
}

/// Overall status: healthy while at least one enabled provider is healthy
fn health_status(router: &LlmRouter) -> HealthStatus {
    let enabled = router.registry().enabled_providers();
    let any_healthy = enabled.iter().any(|id| router.is_provider_healthy(*id));

    let providers = router
        .health()
        .snapshot()
        .into_iter()
        .filter(|s| enabled.contains(&s.provider))
        .collect();

    HealthStatus {
        status: if any_healthy { "healthy" } else { "unavailable" },
        timestamp: current_timestamp(),
        providers,
    }
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: &'static str,
    timestamp: u64,
    providers: Vec<ProviderHealthSnapshot>,
}

#[derive(Debug, Serialize)]
struct ApiDocumentationResponse {
    endpoints: BTreeMap<&'static str, &'static str>,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
