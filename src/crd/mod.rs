//! Custom Resource Definitions for tenancy
//!
//! This module contains all CRD definitions used by the tenancy operator.

mod enroll_request;
mod tenant;
mod workspace;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

pub use enroll_request::{EnrollRequest, EnrollRequestSpec, EnrollRequestStatus};
pub use tenant::{Tenant, TenantSpec, TenantWorkspaceEntry, WorkspaceRole};
pub use workspace::{
    workspace_name_from_namespace, workspace_namespace, AutoEnrollPolicy, Workspace,
    WorkspaceSpec,
};

/// All CRDs owned by the operator, in installation order
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![Workspace::crd(), Tenant::crd(), EnrollRequest::crd()]
}
