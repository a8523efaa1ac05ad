//! Workspace Custom Resource Definition
//!
//! A Workspace is a cluster-scoped grouping of tenants. Its auto-enroll policy
//! decides what happens to EnrollRequests created in the workspace namespace.
//! This operator only reads Workspaces.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::WORKSPACE_NAMESPACE_PREFIX;

/// Specification for a Workspace
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tenancy.dev",
    version = "v1alpha1",
    kind = "Workspace",
    plural = "workspaces",
    shortname = "ws",
    namespaced = false,
    printcolumn = r#"{"name":"AutoEnroll","type":"boolean","jsonPath":".spec.autoEnroll.enabled"}"#,
    printcolumn = r#"{"name":"SelfEnroll","type":"boolean","jsonPath":".spec.autoEnroll.selfEnroll"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSpec {
    /// Human readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pretty_name: Option<String>,

    /// Enrollment policy for requests submitted to this workspace
    #[serde(default)]
    pub auto_enroll: AutoEnrollPolicy,
}

/// Auto-enroll settings of a workspace
///
/// The zero value (both flags off) rejects every request, which is also the
/// policy applied when the workspace does not exist.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AutoEnrollPolicy {
    /// Enrollment requests are processed instead of discarded
    #[serde(default)]
    pub enabled: bool,

    /// Self-submitted requests are accepted without manual approval.
    /// Ignored unless `enabled` is set.
    #[serde(default)]
    pub self_enroll: bool,
}

impl AutoEnrollPolicy {
    /// Returns true if requests should be kept and processed
    pub fn accepts_auto_enroll(&self) -> bool {
        self.enabled
    }

    /// Returns true if self-submitted requests are granted unattended
    pub fn accepts_self_enroll(&self) -> bool {
        self.accepts_auto_enroll() && self.self_enroll
    }
}

/// Namespace holding the EnrollRequests of a workspace
pub fn workspace_namespace(workspace: &str) -> String {
    format!("{WORKSPACE_NAMESPACE_PREFIX}{workspace}")
}

/// Inverse of [`workspace_namespace`]; `None` for namespaces outside the convention
pub fn workspace_name_from_namespace(namespace: &str) -> Option<&str> {
    namespace
        .strip_prefix(WORKSPACE_NAMESPACE_PREFIX)
        .filter(|name| !name.is_empty())
}
