//! Tenancy - Kubernetes operator for tenant self-enrollment into workspaces
//!
//! Users ask to join a workspace by creating an `EnrollRequest` in the
//! workspace namespace. The operator binds every request to its submitter at
//! admission time and later either enrolls the tenant or discards the
//! request, depending on the workspace's auto-enroll policy.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (Workspace, Tenant, EnrollRequest)
//! - [`webhook`] - Mutating admission webhook binding requests to their submitter
//! - [`controller`] - EnrollRequest reconciliation
//! - [`store`] - Object store seam used by the controller
//! - [`install`] - Startup installation of CRDs and webhook registration
//! - [`config`] - Operator configuration
//! - [`telemetry`] - Tracing initialization
//! - [`retry`] - Backoff for startup calls
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod install;
pub mod retry;
pub mod store;
pub mod telemetry;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Prefix of the namespace owned by a workspace, `workspace-<name>`
pub const WORKSPACE_NAMESPACE_PREFIX: &str = "workspace-";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "tenancy-operator";

/// Default port for the admission webhook HTTPS server
///
/// Port 9443 is used instead of 443 to avoid requiring root privileges.
pub const DEFAULT_WEBHOOK_PORT: u16 = 9443;

/// Default deadline of a single reconcile, in seconds
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 30;
