//! Object store access for the enrollment controller
//!
//! The controller talks to the API server only through [`EnrollmentStore`].
//! Lookups map "not found" to `None`, and conditional writes report a lost
//! race as [`Error::Conflict`], so the reconciler can tell both apart from
//! transient failures.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{EnrollRequest, Tenant, Workspace};
use crate::Error;

/// Trait abstracting the store operations used by the enrollment controller
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    /// Get an EnrollRequest, `None` if it does not exist
    async fn get_enroll_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<EnrollRequest>, Error>;

    /// Delete an EnrollRequest; deleting a missing request succeeds
    async fn delete_enroll_request(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Get a Workspace, `None` if it does not exist
    async fn get_workspace(&self, name: &str) -> Result<Option<Workspace>, Error>;

    /// Get a Tenant, `None` if it does not exist
    async fn get_tenant(&self, name: &str) -> Result<Option<Tenant>, Error>;

    /// Replace a Tenant, guarded by its `metadata.resourceVersion`
    ///
    /// Fails with [`Error::Conflict`] if the tenant changed since it was read.
    async fn replace_tenant(&self, tenant: &Tenant) -> Result<Tenant, Error>;
}

/// Real Kubernetes store implementation
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a new KubeStore wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// Classify a failed tenant replace
///
/// A 404 means the tenant was deleted after it was read, which is reported the
/// same way as a tenant missing at read time.
fn replace_tenant_error(name: &str, err: kube::Error) -> Error {
    if is_conflict(&err) {
        Error::conflict("Tenant", name)
    } else if is_not_found(&err) {
        Error::tenant_not_found(name)
    } else {
        err.into()
    }
}

#[async_trait]
impl EnrollmentStore for KubeStore {
    async fn get_enroll_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<EnrollRequest>, Error> {
        let api: Api<EnrollRequest> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn delete_enroll_request(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<EnrollRequest> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(namespace = %namespace, enroll_request = %name, "enrollrequest already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_workspace(&self, name: &str) -> Result<Option<Workspace>, Error> {
        let api: Api<Workspace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn get_tenant(&self, name: &str) -> Result<Option<Tenant>, Error> {
        let api: Api<Tenant> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn replace_tenant(&self, tenant: &Tenant) -> Result<Tenant, Error> {
        let name = tenant.name_any();
        let api: Api<Tenant> = Api::all(self.client.clone());
        api.replace(&name, &PostParams::default(), tenant)
            .await
            .map_err(|e| replace_tenant_error(&name, e))
    }
}
