//! Tenant Custom Resource Definition
//!
//! A Tenant is the cluster-scoped record of a user: the workspaces they belong
//! to (with a role each) and their public SSH keys.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a Tenant
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tenancy.dev",
    version = "v1alpha1",
    kind = "Tenant",
    plural = "tenants",
    shortname = "tn",
    namespaced = false,
    printcolumn = r#"{"name":"Email","type":"string","jsonPath":".spec.email"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    /// Given name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,

    /// Family name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    /// Contact address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Workspace memberships, in enrollment order
    #[serde(default)]
    pub workspaces: Vec<TenantWorkspaceEntry>,

    /// Public SSH keys
    #[serde(default)]
    pub public_keys: Vec<String>,
}

/// Membership of a tenant in one workspace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct TenantWorkspaceEntry {
    /// Workspace name
    pub name: String,
    /// Role held in the workspace
    pub role: WorkspaceRole,
}

/// Role of a tenant inside a workspace
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceRole {
    /// Manages the workspace and its members
    Manager,
    /// Regular member; the role granted by self-enrollment
    #[default]
    User,
}

impl std::fmt::Display for WorkspaceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manager => write!(f, "manager"),
            Self::User => write!(f, "user"),
        }
    }
}

impl TenantSpec {
    /// Returns true if the tenant already holds any role in `workspace`
    pub fn is_member_of(&self, workspace: &str) -> bool {
        self.workspaces.iter().any(|entry| entry.name == workspace)
    }

    /// Add a `user` membership for `workspace`
    ///
    /// Returns false, leaving the list untouched, when a membership for the
    /// workspace already exists.
    pub fn enroll(&mut self, workspace: &str) -> bool {
        if self.is_member_of(workspace) {
            return false;
        }
        self.workspaces.push(TenantWorkspaceEntry {
            name: workspace.to_string(),
            role: WorkspaceRole::User,
        });
        true
    }
}
