//! Mutating Admission Webhook for tenancy
//!
//! Intercepts EnrollRequest creation and binds the request to the user
//! submitting it before it is persisted. The webhook is stateless; every
//! review is answered from the submitted object and the caller identity.

pub mod admission;
pub mod enroll_request;

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::routing::{get, post};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Error;

pub use admission::{AdmissionError, AdmissionOutcome, Mutator};
pub use enroll_request::EnrollRequestMutator;

/// Certificate and key served by the webhook
#[derive(Clone, Debug)]
pub struct TlsFiles {
    /// PEM certificate chain
    pub cert: PathBuf,
    /// PEM private key
    pub key: PathBuf,
}

/// Create the webhook router with all mutation endpoints
///
/// Currently supports:
/// - POST /mutate/enrollrequests - Bind EnrollRequests to their submitter
/// - GET /healthz - Liveness probe
pub fn webhook_router() -> Router {
    Router::new()
        .route(
            "/mutate/enrollrequests",
            post(enroll_request::mutate_handler),
        )
        .route("/healthz", get(healthz))
}

async fn healthz() -> &'static str {
    "ok"
}

/// Serve the webhook on `addr` until `shutdown` is cancelled
///
/// Serves HTTPS when `tls` is set and plain HTTP otherwise, for use behind a
/// TLS-terminating proxy or in development.
pub async fn serve(
    addr: SocketAddr,
    tls: Option<TlsFiles>,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    let router = webhook_router();

    match tls {
        Some(files) => {
            let tls_config = RustlsConfig::from_pem_file(&files.cert, &files.key)
                .await
                .map_err(|e| Error::server(format!("failed to load webhook TLS config: {e}")))?;

            let handle = axum_server::Handle::new();
            let stop = handle.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                stop.graceful_shutdown(None);
            });

            info!(addr = %addr, "Starting HTTPS webhook server");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(router.into_make_service())
                .await
                .map_err(|e| Error::server(format!("webhook server error: {e}")))
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .map_err(|e| Error::server(format!("failed to bind {addr}: {e}")))?;

            info!(addr = %addr, "Starting plain HTTP webhook server");
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .map_err(|e| Error::server(format!("webhook server error: {e}")))
        }
    }
}
