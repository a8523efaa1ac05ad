//! EnrollRequest controller implementation
//!
//! Each reconcile re-reads the request, its workspace and its tenant from
//! the store and applies the workspace's auto-enroll policy:
//!
//! - auto-enroll disabled (or workspace missing): the request is deleted
//! - auto-enroll and self-enroll enabled: the tenant gets a `user` membership
//!   and the request is deleted
//! - auto-enroll without self-enroll: the request is left pending
//!
//! Nothing is kept between reconciles, so repeated or stale triggers are
//! harmless: a request that no longer exists is a no-op.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::{Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::scope::ReconcileScope;
use crate::crd::{workspace_namespace, AutoEnrollPolicy, EnrollRequest};
use crate::store::{EnrollmentStore, KubeStore};
use crate::{Error, DEFAULT_RECONCILE_TIMEOUT_SECS};

/// Requeue delay after losing an optimistic-concurrency race
const REQUEUE_CONFLICT_SECS: u64 = 1;
/// Requeue delay after a transient failure
const REQUEUE_ERROR_SECS: u64 = 5;
/// Requeue delay for failures that need operator intervention
const REQUEUE_PERMANENT_SECS: u64 = 300;

/// Shared state for the EnrollRequest controller
pub struct Context {
    /// Store used for every read and write
    pub store: Arc<dyn EnrollmentStore>,
    reconcile_timeout: Duration,
    shutdown: CancellationToken,
}

impl Context {
    /// Create a context over the given store
    pub fn new(store: Arc<dyn EnrollmentStore>) -> Self {
        Self {
            store,
            reconcile_timeout: Duration::from_secs(DEFAULT_RECONCILE_TIMEOUT_SECS),
            shutdown: CancellationToken::new(),
        }
    }

    /// Create a context backed by the Kubernetes API
    pub fn from_client(client: Client) -> Self {
        Self::new(Arc::new(KubeStore::new(client)))
    }

    /// Set the deadline applied to each reconcile
    pub fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    /// Cancel in-flight reconciles when `token` is cancelled
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Start the scope of a new reconcile
    pub fn scope(&self) -> ReconcileScope {
        ReconcileScope::new(&self.shutdown, self.reconcile_timeout)
    }
}

/// Result of evaluating one EnrollRequest
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnrollmentOutcome {
    /// The request no longer exists
    Gone,
    /// The workspace refuses auto-enrollment; the request was deleted
    Rejected {
        /// Target workspace
        workspace: String,
    },
    /// The tenant was added to the workspace and the request deleted
    Enrolled {
        /// Enrolled tenant
        tenant: String,
        /// Target workspace
        workspace: String,
    },
    /// The tenant was already a member; only the request was deleted
    AlreadyMember {
        /// Tenant named by the request
        tenant: String,
        /// Target workspace
        workspace: String,
    },
    /// Auto-enroll is on but self-enroll is off; the request waits
    Pending {
        /// Target workspace
        workspace: String,
    },
}

/// Reconcile an EnrollRequest
///
/// Entry point for the controller runtime. The cached object only provides
/// the identity; the decision is made on a fresh read of the store.
#[instrument(
    skip(request, ctx),
    fields(enroll_request = %request.name_any(), namespace = %request.namespace().unwrap_or_default())
)]
pub async fn reconcile(request: Arc<EnrollRequest>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = ObjectRef::from_obj(request.as_ref());
    let scope = ctx.scope();

    let outcome = evaluate(&key, &ctx, &scope).await?;
    debug!(?outcome, "enrollrequest reconciled");

    // Pending requests are woken up again by the workspace watch
    Ok(Action::await_change())
}

/// Evaluate the EnrollRequest identified by `key` and drive it to its outcome
pub async fn evaluate(
    key: &ObjectRef<EnrollRequest>,
    ctx: &Context,
    scope: &ReconcileScope,
) -> Result<EnrollmentOutcome, Error> {
    let store = &ctx.store;
    let namespace = key.namespace.as_deref().unwrap_or_default();
    let name = key.name.as_str();

    let request = match scope
        .call(
            "get enrollrequest",
            store.get_enroll_request(namespace, name),
        )
        .await?
    {
        Some(request) => request,
        None => {
            info!(namespace = %namespace, enroll_request = %name, "enrollrequest deleted");
            return Ok(EnrollmentOutcome::Gone);
        }
    };

    let workspace = match request.workspace_name() {
        Ok(workspace) => workspace.to_string(),
        Err(e) => {
            error!(error = %e, "enrollrequest is not in a workspace namespace");
            return Err(e);
        }
    };

    let policy = scope
        .call("get workspace", store.get_workspace(&workspace))
        .await?
        .map(|ws| ws.spec.auto_enroll)
        .unwrap_or_else(|| {
            debug!(workspace = %workspace, "workspace not found, applying default policy");
            AutoEnrollPolicy::default()
        });

    let tenant_name = request.spec.tenant.clone();
    let tenant = if tenant_name.is_empty() {
        None
    } else {
        scope
            .call("get tenant", store.get_tenant(&tenant_name))
            .await?
    };

    if !policy.accepts_auto_enroll() {
        info!(workspace = %workspace, "workspace does not accept autoenroll, discarding request");
        scope
            .call(
                "delete enrollrequest",
                store.delete_enroll_request(namespace, name),
            )
            .await?;
        return Ok(EnrollmentOutcome::Rejected { workspace });
    }

    if !policy.accepts_self_enroll() {
        debug!(workspace = %workspace, "workspace does not accept selfenroll, request left pending");
        return Ok(EnrollmentOutcome::Pending { workspace });
    }

    let mut tenant = match tenant {
        Some(tenant) => tenant,
        None => {
            warn!(tenant = %tenant_name, workspace = %workspace, "tenant to enroll not found");
            return Err(Error::tenant_not_found(tenant_name));
        }
    };

    let outcome = if tenant.spec.enroll(&workspace) {
        info!(tenant = %tenant_name, workspace = %workspace, "selfenrolling tenant");
        scope
            .call("update tenant", store.replace_tenant(&tenant))
            .await?;
        EnrollmentOutcome::Enrolled {
            tenant: tenant_name,
            workspace,
        }
    } else {
        info!(tenant = %tenant_name, workspace = %workspace, "tenant already enrolled");
        EnrollmentOutcome::AlreadyMember {
            tenant: tenant_name,
            workspace,
        }
    };

    scope
        .call(
            "delete enrollrequest",
            store.delete_enroll_request(namespace, name),
        )
        .await?;

    Ok(outcome)
}

/// Error policy for the EnrollRequest controller
///
/// Every failure is requeued; the delay depends on the kind of failure:
/// - conflicts: immediately re-run from a fresh read
/// - other retryable errors: short backoff
/// - configuration errors: slow requeue, they need an operator to fix them
pub fn error_policy(request: Arc<EnrollRequest>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        enroll_request = %request.name_any(),
        namespace = ?request.namespace(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    requeue_after(error)
}

fn requeue_after(error: &Error) -> Action {
    let secs = if error.is_conflict() {
        REQUEUE_CONFLICT_SECS
    } else if error.is_retryable() {
        REQUEUE_ERROR_SECS
    } else {
        REQUEUE_PERMANENT_SECS
    };
    Action::requeue(Duration::from_secs(secs))
}

/// EnrollRequests to re-evaluate after a change of `workspace`
///
/// Picks the requests living in the workspace namespace out of `requests`,
/// typically the controller's cache of EnrollRequests.
pub fn requests_for_workspace(
    workspace: &str,
    requests: impl IntoIterator<Item = Arc<EnrollRequest>>,
) -> Vec<ObjectRef<EnrollRequest>> {
    let namespace = workspace_namespace(workspace);
    requests
        .into_iter()
        .filter(|er| er.metadata.namespace.as_deref() == Some(namespace.as_str()))
        .map(|er| ObjectRef::from_obj(er.as_ref()))
        .collect()
}
