//! EnrollRequest Mutation Webhook
//!
//! Binds every new EnrollRequest to the user submitting it: an empty
//! `spec.tenant` is filled in with the username, and both the tenant and the
//! object name must match the username for the request to be admitted.

use axum::Json;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use tracing::{error, info, instrument};

use super::admission::{respond, AdmissionError, Mutator};
use crate::crd::EnrollRequest;

/// Mutator enforcing the identity binding of EnrollRequests
#[derive(Clone, Copy, Debug, Default)]
pub struct EnrollRequestMutator;

impl Mutator for EnrollRequestMutator {
    type Object = EnrollRequest;

    fn validate(&self, request: &mut EnrollRequest, caller: &str) -> Result<(), AdmissionError> {
        check_or_insert_tenant(request, caller)?;
        check_name(request, caller)
    }
}

/// Fill in an empty tenant with `caller`, reject a tenant naming someone else
pub fn check_or_insert_tenant(
    request: &mut EnrollRequest,
    caller: &str,
) -> Result<(), AdmissionError> {
    if request.spec.tenant.is_empty() {
        request.spec.tenant = caller.to_string();
        return Ok(());
    }
    if request.spec.tenant != caller {
        return Err(AdmissionError::Invalid(
            "tenant field is not empty and does not match the username".to_string(),
        ));
    }
    Ok(())
}

/// Reject a request whose name is not the username of `caller`
///
/// Only `metadata.name` counts. A `generateName` prefix is expanded by the API
/// server after admission, so the stored name could never match.
pub fn check_name(request: &EnrollRequest, caller: &str) -> Result<(), AdmissionError> {
    if request.metadata.name.as_deref() != Some(caller) {
        return Err(AdmissionError::Invalid(
            "name field does not match the username".to_string(),
        ));
    }
    Ok(())
}

/// Handle mutating admission review for EnrollRequests
#[instrument(skip_all)]
pub async fn mutate_handler(
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    info!(
        uid = %req.uid,
        namespace = ?req.namespace,
        enroll_request = %req.name,
        user = ?req.user_info.username,
        "Reviewing enrollrequest"
    );

    Json(respond(&EnrollRequestMutator, &req).into_review())
}
