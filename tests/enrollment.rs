//! End-to-end enrollment stories over an in-memory object store
//!
//! The store mimics the API server semantics the controller relies on:
//! lookups of missing objects return `None` and tenant replaces are guarded
//! by `resourceVersion`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use serde_json::json;
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

use tenancy::controller::{evaluate, requests_for_workspace, Context, EnrollmentOutcome};
use tenancy::crd::{
    AutoEnrollPolicy, EnrollRequest, EnrollRequestSpec, Tenant, TenantSpec, TenantWorkspaceEntry,
    Workspace, WorkspaceRole, WorkspaceSpec,
};
use tenancy::store::EnrollmentStore;
use tenancy::webhook::{AdmissionOutcome, EnrollRequestMutator, Mutator};
use tenancy::Error;

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Default)]
struct State {
    requests: BTreeMap<(String, String), EnrollRequest>,
    workspaces: BTreeMap<String, Workspace>,
    tenants: BTreeMap<String, Tenant>,
    next_version: u64,
    tenant_writes: usize,
}

#[derive(Default)]
struct MemoryStore {
    state: Mutex<State>,
    /// When armed, tenant reads wait here so racing reconciles read the same version
    tenant_read_gate: Mutex<Option<Arc<Barrier>>>,
}

impl MemoryStore {
    fn arm_tenant_read_gate(&self, parties: usize) {
        *self.tenant_read_gate.lock().unwrap() = Some(Arc::new(Barrier::new(parties)));
    }

    fn disarm_tenant_read_gate(&self) {
        *self.tenant_read_gate.lock().unwrap() = None;
    }

    fn put_request(&self, namespace: &str, name: &str, tenant: &str) {
        let mut er = EnrollRequest::new(
            name,
            EnrollRequestSpec {
                tenant: tenant.to_string(),
            },
        );
        er.metadata.namespace = Some(namespace.to_string());
        self.state
            .lock()
            .unwrap()
            .requests
            .insert((namespace.to_string(), name.to_string()), er);
    }

    fn put_workspace(&self, name: &str, enabled: bool, self_enroll: bool) {
        let ws = Workspace::new(
            name,
            WorkspaceSpec {
                pretty_name: Some(name.to_uppercase()),
                auto_enroll: AutoEnrollPolicy {
                    enabled,
                    self_enroll,
                },
            },
        );
        self.state
            .lock()
            .unwrap()
            .workspaces
            .insert(name.to_string(), ws);
    }

    fn put_tenant(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.next_version += 1;
        let mut tn = Tenant::new(name, TenantSpec::default());
        tn.metadata.resource_version = Some(state.next_version.to_string());
        state.tenants.insert(name.to_string(), tn);
    }

    fn request(&self, namespace: &str, name: &str) -> Option<EnrollRequest> {
        self.state
            .lock()
            .unwrap()
            .requests
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn memberships(&self, tenant: &str) -> Vec<TenantWorkspaceEntry> {
        self.state.lock().unwrap().tenants[tenant].spec.workspaces.clone()
    }

    fn tenant_writes(&self) -> usize {
        self.state.lock().unwrap().tenant_writes
    }

    fn all_requests(&self) -> Vec<Arc<EnrollRequest>> {
        self.state
            .lock()
            .unwrap()
            .requests
            .values()
            .cloned()
            .map(Arc::new)
            .collect()
    }
}

#[async_trait]
impl EnrollmentStore for MemoryStore {
    async fn get_enroll_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<EnrollRequest>, Error> {
        Ok(self.request(namespace, name))
    }

    async fn delete_enroll_request(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.state
            .lock()
            .unwrap()
            .requests
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn get_workspace(&self, name: &str) -> Result<Option<Workspace>, Error> {
        Ok(self.state.lock().unwrap().workspaces.get(name).cloned())
    }

    async fn get_tenant(&self, name: &str) -> Result<Option<Tenant>, Error> {
        let tenant = self.state.lock().unwrap().tenants.get(name).cloned();
        let gate = self.tenant_read_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.wait().await;
        }
        Ok(tenant)
    }

    async fn replace_tenant(&self, tenant: &Tenant) -> Result<Tenant, Error> {
        let mut state = self.state.lock().unwrap();
        let name = tenant.name_any();
        let current = state
            .tenants
            .get(&name)
            .ok_or_else(|| Error::tenant_not_found(&name))?;
        if current.metadata.resource_version != tenant.metadata.resource_version {
            return Err(Error::conflict("Tenant", name));
        }

        state.next_version += 1;
        let mut stored = tenant.clone();
        stored.metadata.resource_version = Some(state.next_version.to_string());
        state.tenants.insert(name, stored.clone());
        state.tenant_writes += 1;
        Ok(stored)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn key(namespace: &str, name: &str) -> ObjectRef<EnrollRequest> {
    ObjectRef::new(name).within(namespace)
}

async fn reconcile_once(
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<EnrollmentOutcome, Error> {
    evaluate(&key(namespace, name), ctx, &ctx.scope()).await
}

/// Reconcile until success, the way the controller requeues retryable errors
async fn reconcile_until_done(ctx: &Context, namespace: &str, name: &str) -> EnrollmentOutcome {
    for _ in 0..5 {
        match reconcile_once(ctx, namespace, name).await {
            Ok(outcome) => return outcome,
            Err(e) if e.is_retryable() => continue,
            Err(e) => panic!("permanent failure: {e}"),
        }
    }
    panic!("reconcile did not converge");
}

fn user_of(workspace: &str) -> TenantWorkspaceEntry {
    TenantWorkspaceEntry {
        name: workspace.to_string(),
        role: WorkspaceRole::User,
    }
}

// =============================================================================
// Stories
// =============================================================================

/// Story: alice creates a request without a tenant, is bound to it at
/// admission and enrolled by the controller
#[tokio::test]
async fn story_admitted_request_leads_to_enrollment() {
    let raw = json!({
        "apiVersion": "tenancy.dev/v1alpha1",
        "kind": "EnrollRequest",
        "metadata": { "name": "alice", "namespace": "workspace-ws1" },
        "spec": {}
    });
    let AdmissionOutcome::Allow { patch: Some(patch) } =
        EnrollRequestMutator.handle(&raw, Some("alice"))
    else {
        panic!("request should be admitted with a patch");
    };

    let mut admitted = raw.clone();
    json_patch::patch(&mut admitted, &patch).unwrap();
    let admitted: EnrollRequest = serde_json::from_value(admitted).unwrap();
    assert_eq!(admitted.metadata.name.as_deref(), Some("alice"));
    assert_eq!(admitted.spec.tenant, "alice");

    let store = Arc::new(MemoryStore::default());
    store.put_request("workspace-ws1", "alice", "alice");
    store.put_workspace("ws1", true, true);
    store.put_tenant("alice");
    let ctx = Context::new(store.clone());

    let outcome = reconcile_once(&ctx, "workspace-ws1", "alice").await.unwrap();
    assert_eq!(
        outcome,
        EnrollmentOutcome::Enrolled {
            tenant: "alice".to_string(),
            workspace: "ws1".to_string()
        }
    );
    assert_eq!(store.memberships("alice"), vec![user_of("ws1")]);
    assert!(store.request("workspace-ws1", "alice").is_none());
}

/// Story: reconciling a request that does not exist changes nothing, twice
#[tokio::test]
async fn story_reconciling_missing_request_is_idempotent() {
    let store = Arc::new(MemoryStore::default());
    store.put_workspace("ws1", true, true);
    store.put_tenant("alice");
    let ctx = Context::new(store.clone());

    for _ in 0..2 {
        let outcome = reconcile_once(&ctx, "workspace-ws1", "alice").await.unwrap();
        assert_eq!(outcome, EnrollmentOutcome::Gone);
    }
    assert!(store.memberships("alice").is_empty());
    assert_eq!(store.tenant_writes(), 0);
}

/// Story: a workspace without auto-enroll discards the request and leaves the tenant alone
#[tokio::test]
async fn story_policy_rejection_deletes_request() {
    let store = Arc::new(MemoryStore::default());
    store.put_request("workspace-ws1", "alice", "alice");
    store.put_workspace("ws1", false, false);
    store.put_tenant("alice");
    let ctx = Context::new(store.clone());

    let outcome = reconcile_once(&ctx, "workspace-ws1", "alice").await.unwrap();
    assert!(matches!(outcome, EnrollmentOutcome::Rejected { .. }));
    assert!(store.request("workspace-ws1", "alice").is_none());
    assert!(store.memberships("alice").is_empty());
    assert_eq!(store.tenant_writes(), 0);
}

/// Story: self-enroll disabled keeps the request until the workspace changes
#[tokio::test]
async fn story_pending_request_completes_after_workspace_change() {
    let store = Arc::new(MemoryStore::default());
    store.put_request("workspace-ws1", "alice", "alice");
    store.put_request("workspace-ws1", "bob", "bob");
    store.put_request("workspace-ws2", "carol", "carol");
    store.put_workspace("ws1", true, false);
    store.put_workspace("ws2", true, false);
    for tenant in ["alice", "bob", "carol"] {
        store.put_tenant(tenant);
    }
    let ctx = Context::new(store.clone());

    let before = store.request("workspace-ws1", "alice").map(|er| er.spec);
    let outcome = reconcile_once(&ctx, "workspace-ws1", "alice").await.unwrap();
    assert!(matches!(outcome, EnrollmentOutcome::Pending { .. }));
    assert_eq!(store.request("workspace-ws1", "alice").map(|er| er.spec), before);
    assert!(store.memberships("alice").is_empty());

    // The workspace admin turns on self-enroll; the watch fans out to ws1 requests only
    store.put_workspace("ws1", true, true);
    let affected = requests_for_workspace("ws1", store.all_requests());
    let mut names: Vec<_> = affected.iter().map(|r| r.name.clone()).collect();
    names.sort();
    assert_eq!(names, ["alice", "bob"]);

    for request in &affected {
        let namespace = request.namespace.as_deref().unwrap();
        reconcile_once(&ctx, namespace, &request.name).await.unwrap();
    }

    assert_eq!(store.memberships("alice"), vec![user_of("ws1")]);
    assert_eq!(store.memberships("bob"), vec![user_of("ws1")]);
    assert!(store.memberships("carol").is_empty());
    assert!(store.request("workspace-ws2", "carol").is_some());
}

/// Story: a resubmitted request does not add a second membership
#[tokio::test]
async fn story_enrollment_is_not_duplicated() {
    let store = Arc::new(MemoryStore::default());
    store.put_workspace("ws1", true, true);
    store.put_tenant("alice");
    let ctx = Context::new(store.clone());

    for expected_writes in [1, 1] {
        store.put_request("workspace-ws1", "alice", "alice");
        reconcile_once(&ctx, "workspace-ws1", "alice").await.unwrap();
        assert_eq!(store.tenant_writes(), expected_writes);
    }
    assert_eq!(store.memberships("alice"), vec![user_of("ws1")]);
}

/// Story: two workspaces enroll the same tenant at once; the loser of the
/// conditional write retries and both memberships survive
#[tokio::test]
async fn story_racing_enrollments_both_succeed() {
    let store = Arc::new(MemoryStore::default());
    store.arm_tenant_read_gate(2);
    store.put_request("workspace-ws1", "alice", "alice");
    store.put_request("workspace-ws2", "alice", "alice");
    store.put_workspace("ws1", true, true);
    store.put_workspace("ws2", true, true);
    store.put_tenant("alice");
    let ctx = Context::new(store.clone());

    let (first, second) = tokio::join!(
        reconcile_once(&ctx, "workspace-ws1", "alice"),
        reconcile_once(&ctx, "workspace-ws2", "alice"),
    );

    // Both read the same version, so exactly one write went through
    let (loser_ns, loser_err) = match (first, second) {
        (Ok(_), Err(e)) => ("workspace-ws2", e),
        (Err(e), Ok(_)) => ("workspace-ws1", e),
        other => panic!("expected exactly one conflict, got {other:?}"),
    };
    assert!(loser_err.is_conflict());
    assert!(store.request(loser_ns, "alice").is_some());

    // The requeued reconcile no longer races and reads the fresh tenant
    store.disarm_tenant_read_gate();
    let outcome = reconcile_until_done(&ctx, loser_ns, "alice").await;
    assert!(matches!(outcome, EnrollmentOutcome::Enrolled { .. }));

    let mut memberships = store.memberships("alice");
    memberships.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(memberships, vec![user_of("ws1"), user_of("ws2")]);
    assert_eq!(store.tenant_writes(), 2);
    assert!(store.request("workspace-ws1", "alice").is_none());
    assert!(store.request("workspace-ws2", "alice").is_none());
}

/// Story: a shutdown in the middle of a reconcile is reported as needing a retry
#[tokio::test]
async fn story_cancelled_reconcile_needs_retry() {
    let store = Arc::new(MemoryStore::default());
    store.put_request("workspace-ws1", "alice", "alice");
    store.put_workspace("ws1", true, true);
    store.put_tenant("alice");

    let shutdown = CancellationToken::new();
    let ctx = Context::new(store.clone()).with_shutdown(shutdown.clone());
    shutdown.cancel();

    let err = reconcile_once(&ctx, "workspace-ws1", "alice")
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(store.request("workspace-ws1", "alice").is_some());
    assert!(store.memberships("alice").is_empty());
}

/// Story: a store stuck past the reconcile deadline is reported as needing a retry
#[tokio::test(start_paused = true)]
async fn story_timed_out_reconcile_needs_retry() {
    // A barrier nobody else reaches blocks the tenant read forever
    let store = Arc::new(MemoryStore::default());
    store.arm_tenant_read_gate(2);
    store.put_request("workspace-ws1", "alice", "alice");
    store.put_workspace("ws1", true, true);
    store.put_tenant("alice");
    let ctx = Context::new(store.clone()).with_reconcile_timeout(Duration::from_secs(5));

    let err = reconcile_once(&ctx, "workspace-ws1", "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert!(err.is_retryable());
    assert!(store.request("workspace-ws1", "alice").is_some());
}
