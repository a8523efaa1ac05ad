//! EnrollRequest Custom Resource Definition
//!
//! An EnrollRequest is a short-lived, namespaced object through which a user
//! asks to join the workspace that owns the namespace. The object name and
//! `spec.tenant` are both bound to the submitting user by the admission
//! webhook, and the object is consumed (deleted) by the enrollment controller.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::workspace::workspace_name_from_namespace;
use crate::Error;

/// Specification for an EnrollRequest
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tenancy.dev",
    version = "v1alpha1",
    kind = "EnrollRequest",
    plural = "enrollrequests",
    shortname = "er",
    status = "EnrollRequestStatus",
    namespaced,
    printcolumn = r#"{"name":"Tenant","type":"string","jsonPath":".spec.tenant"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequestSpec {
    /// Tenant asking to be enrolled
    ///
    /// Filled in with the requesting user by the admission webhook when left empty.
    #[serde(default)]
    pub tenant: String,
}

/// Status for an EnrollRequest
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequestStatus {
    /// Whether the request passed validation
    #[serde(default)]
    pub valid: bool,
}

impl EnrollRequest {
    /// Name of the workspace this request targets, derived from its namespace
    pub fn workspace_name(&self) -> Result<&str, Error> {
        let namespace = self.metadata.namespace.as_deref().unwrap_or_default();
        workspace_name_from_namespace(namespace).ok_or_else(|| Error::invalid_namespace(namespace))
    }
}
