//! Shared admission plumbing
//!
//! A [`Mutator`] decodes the submitted object, validates and normalizes it
//! against the caller identity, and is answered with a JSON patch from the
//! submitted object to the normalized one. [`respond`] turns the outcome into
//! the `AdmissionResponse` returned to the API server.

use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

/// HTTP status reported for rejected objects
pub const STATUS_BAD_REQUEST: u16 = 400;
/// HTTP status reported when the normalized object cannot be encoded
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// Reasons an admission request is rejected
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// The review carried no object
    #[error("admission request carries no object")]
    MissingObject,

    /// The review carried no caller identity
    #[error("admission request carries no username")]
    MissingUser,

    /// The object does not decode into the expected kind
    #[error("{0}")]
    Decode(String),

    /// The object failed validation
    #[error("{0}")]
    Invalid(String),

    /// The normalized object could not be encoded
    #[error("{0}")]
    Serialization(String),
}

impl AdmissionError {
    /// HTTP status code reported in the admission response
    pub fn status(&self) -> u16 {
        match self {
            AdmissionError::Serialization(_) => STATUS_INTERNAL_ERROR,
            _ => STATUS_BAD_REQUEST,
        }
    }
}

/// Decision of a mutator for one admission request
#[derive(Clone, Debug, PartialEq)]
pub enum AdmissionOutcome {
    /// Admit the object, applying `patch` when the object was normalized
    Allow {
        /// Patch from the submitted to the normalized object
        patch: Option<json_patch::Patch>,
    },
    /// Refuse the object
    Reject {
        /// HTTP status code
        status: u16,
        /// Message shown to the submitter
        reason: String,
    },
}

impl From<AdmissionError> for AdmissionOutcome {
    fn from(err: AdmissionError) -> Self {
        AdmissionOutcome::Reject {
            status: err.status(),
            reason: err.to_string(),
        }
    }
}

/// Decode, validate and normalize one kind of object at admission time
pub trait Mutator {
    /// Typed object handled by this mutator
    type Object: Serialize + DeserializeOwned;

    /// Decode the raw submitted object
    fn decode(&self, raw: &Value) -> Result<Self::Object, AdmissionError> {
        serde_json::from_value(raw.clone()).map_err(|e| AdmissionError::Decode(e.to_string()))
    }

    /// Validate `object` for `caller`, normalizing it in place
    fn validate(&self, object: &mut Self::Object, caller: &str) -> Result<(), AdmissionError>;

    /// Run decode and validate, and diff the normalized object against `raw`
    fn handle(&self, raw: &Value, caller: Option<&str>) -> AdmissionOutcome {
        match normalize(self, raw, caller) {
            Ok(patch) => AdmissionOutcome::Allow { patch },
            Err(err) => err.into(),
        }
    }
}

fn normalize<M: Mutator + ?Sized>(
    mutator: &M,
    raw: &Value,
    caller: Option<&str>,
) -> Result<Option<json_patch::Patch>, AdmissionError> {
    let mut object = mutator.decode(raw)?;
    let caller = caller
        .filter(|c| !c.is_empty())
        .ok_or(AdmissionError::MissingUser)?;
    mutator.validate(&mut object, caller)?;

    let normalized =
        serde_json::to_value(&object).map_err(|e| AdmissionError::Serialization(e.to_string()))?;
    let patch = json_patch::diff(raw, &normalized);
    Ok((!patch.0.is_empty()).then_some(patch))
}

/// Run `mutator` on an admission request and build the response
pub fn respond<M: Mutator>(
    mutator: &M,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let uid = request.uid.as_str();

    let outcome = match &request.object {
        Some(obj) => match serde_json::to_value(obj) {
            Ok(raw) => mutator.handle(&raw, request.user_info.username.as_deref()),
            Err(e) => AdmissionError::Decode(e.to_string()).into(),
        },
        None => AdmissionError::MissingObject.into(),
    };

    match outcome {
        AdmissionOutcome::Allow { patch: None } => {
            debug!(uid = %uid, "object admitted unchanged");
            AdmissionResponse::from(request)
        }
        AdmissionOutcome::Allow { patch: Some(patch) } => {
            debug!(uid = %uid, patch_ops = patch.0.len(), "object admitted with patch");
            match AdmissionResponse::from(request).with_patch(patch) {
                Ok(response) => response,
                Err(e) => {
                    error!(uid = %uid, error = %e, "failed to serialize patch");
                    deny(request, STATUS_INTERNAL_ERROR, format!("patch serialization error: {e}"))
                }
            }
        }
        AdmissionOutcome::Reject { status, reason } => {
            warn!(uid = %uid, status, reason = %reason, "object rejected");
            deny(request, status, reason)
        }
    }
}

fn deny(request: &AdmissionRequest<DynamicObject>, status: u16, reason: String) -> AdmissionResponse {
    let mut response = AdmissionResponse::from(request).deny(reason);
    response.result.code = status;
    response
}
