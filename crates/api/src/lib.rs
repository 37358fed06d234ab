//! HTTP API server with observability for the ticket allocation system.
//!
//! Provides REST endpoints for driving allocation transactions and inspecting
//! tickets and lists, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{InMemoryTicketListService, ProcessConfig, ProcessManager};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use tokio::sync::watch;

use routes::allocators::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/allocators", post(routes::allocators::start::<S>))
        .route("/allocators/{id}", get(routes::allocators::get::<S>))
        .route(
            "/allocators/{id}/continue",
            post(routes::allocators::resume::<S>),
        )
        .route("/allocators/{id}/apply", post(routes::allocators::apply::<S>))
        .route("/allocators/{id}/cancel", post(routes::allocators::cancel::<S>))
        .route("/allocators/{id}/abort", post(routes::allocators::abort::<S>))
        .route("/tickets/{id}", get(routes::tickets::get_ticket::<S>))
        .route("/lists/{id}", get(routes::tickets::get_list::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the default application state with an in-memory ticket list service.
pub fn create_default_state<S: EventStore + Clone + 'static>(
    event_store: S,
    config: ProcessConfig,
) -> Arc<AppState<S>> {
    let lists = InMemoryTicketListService::new();
    let manager = Arc::new(ProcessManager::new(event_store, lists, config));
    Arc::new(AppState { manager })
}

/// Resolves once `true` is published on `rx`.
///
/// A dropped sender also resolves it, since no shutdown can be requested
/// afterwards; that case is logged.
pub async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            tracing::warn!("shutdown sender dropped before signalling");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_waits_for_true() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(shutdown_requested(rx));

        tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("shutdown not observed")
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_sender_ends_the_wait() {
        let (tx, rx) = watch::channel(false);
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), shutdown_requested(rx))
            .await
            .expect("dropped sender not observed");
    }
}
