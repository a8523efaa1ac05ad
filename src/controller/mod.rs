//! Controller implementations for tenancy CRDs
//!
//! The EnrollRequest controller watches EnrollRequests directly and fans out
//! Workspace changes to every request living in the workspace namespace, so
//! a pending request is re-evaluated as soon as its workspace policy changes.

mod enroll_request;
mod scope;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, ResourceExt};

use crate::crd::{EnrollRequest, Workspace};

pub use enroll_request::{
    error_policy, evaluate, reconcile, requests_for_workspace, Context, EnrollmentOutcome,
};
pub use scope::ReconcileScope;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the EnrollRequest controller future
///
/// `concurrency` bounds the number of reconciles running at once, 0 means
/// unbounded. Reconciles of the same request never overlap either way.
pub fn build_enrollment_controller(
    client: kube::Client,
    ctx: Arc<Context>,
    concurrency: u16,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let requests: Api<EnrollRequest> = Api::all(client.clone());
    let workspaces: Api<Workspace> = Api::all(client);

    let controller = Controller::new(
        requests,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .with_config(ControllerConfig::default().concurrency(concurrency));

    let cache = controller.store();

    tracing::info!(concurrency, "- EnrollRequest controller");

    Box::pin(
        controller
            .watches(
                workspaces,
                WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
                move |workspace| {
                    let affected = requests_for_workspace(&workspace.name_any(), cache.state());
                    tracing::debug!(
                        workspace = %workspace.name_any(),
                        affected_count = affected.len(),
                        "Triggering re-reconciliation of enrollrequests"
                    );
                    affected
                },
            )
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("EnrollRequest")),
    )
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
