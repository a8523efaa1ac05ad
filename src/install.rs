//! Startup installation of cluster-wide objects
//!
//! CRDs and the webhook registration are applied with server-side apply under
//! the operator's field manager, so restarts and upgrades converge on the
//! definitions compiled into the running binary.

use std::collections::BTreeMap;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    WebhookClientConfig,
};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::api::{Api, ObjectMeta, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::info;

use crate::config::WebhookRegistration;
use crate::crd::all_crds;
use crate::retry::{retry_while, RetryConfig};
use crate::{Error, FIELD_MANAGER};

/// Name of the MutatingWebhookConfiguration
pub const WEBHOOK_CONFIGURATION_NAME: &str = "tenancy-enrollrequest-mutator";
/// Path of the EnrollRequest mutation endpoint
pub const MUTATE_ENROLL_REQUESTS_PATH: &str = "/mutate/enrollrequests";
/// Label selecting the operator pods behind the webhook Service
pub const OPERATOR_APP_LABEL: &str = "tenancy-operator";

/// Install or update all CRDs, retrying while the API server is unavailable
pub async fn ensure_crds_installed(client: &Client) -> Result<(), Error> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let retry = RetryConfig::with_max_attempts(10);

    for crd in all_crds() {
        let name = crd.name_any();
        info!(crd = %name, "Installing CRD");
        retry_while(&retry, &format!("install {name}"), Error::is_retryable, || async {
            crds.patch(&name, &params, &Patch::Apply(&crd))
                .await
                .map_err(Error::from)
        })
        .await?;
    }

    info!("All tenancy CRDs installed/updated");
    Ok(())
}

/// Install the webhook Service and MutatingWebhookConfiguration
pub async fn ensure_webhook_config(
    client: &Client,
    registration: &WebhookRegistration,
    target_port: u16,
) -> Result<(), Error> {
    let ca_bundle = tokio::fs::read(&registration.ca_file).await.map_err(|e| {
        Error::config(format!(
            "failed to read webhook CA file {}: {e}",
            registration.ca_file.display()
        ))
    })?;
    let params = PatchParams::apply(FIELD_MANAGER).force();

    let services: Api<Service> = Api::namespaced(client.clone(), &registration.service_namespace);
    services
        .patch(
            &registration.service_name,
            &params,
            &Patch::Apply(&webhook_service(registration, target_port)),
        )
        .await?;
    info!(service = %registration.service_name, namespace = %registration.service_namespace, "Webhook service installed");

    let configs: Api<MutatingWebhookConfiguration> = Api::all(client.clone());
    configs
        .patch(
            WEBHOOK_CONFIGURATION_NAME,
            &params,
            &Patch::Apply(&webhook_configuration(registration, ca_bundle)),
        )
        .await?;
    info!(name = WEBHOOK_CONFIGURATION_NAME, "MutatingWebhookConfiguration installed");

    Ok(())
}

/// ClusterIP Service routing webhook calls to the operator pods
pub fn webhook_service(registration: &WebhookRegistration, target_port: u16) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(registration.service_name.clone()),
            namespace: Some(registration.service_namespace.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(
                "app".to_string(),
                OPERATOR_APP_LABEL.to_string(),
            )])),
            ports: Some(vec![ServicePort {
                name: Some("https".to_string()),
                port: i32::from(registration.service_port),
                target_port: Some(IntOrString::Int(i32::from(target_port))),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Registration sending EnrollRequest creations to the webhook
pub fn webhook_configuration(
    registration: &WebhookRegistration,
    ca_bundle: Vec<u8>,
) -> MutatingWebhookConfiguration {
    MutatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(WEBHOOK_CONFIGURATION_NAME.to_string()),
            ..Default::default()
        },
        webhooks: Some(vec![MutatingWebhook {
            name: "enrollrequests.tenancy.dev".to_string(),
            admission_review_versions: vec!["v1".to_string()],
            side_effects: "None".to_string(),
            failure_policy: Some("Fail".to_string()),
            match_policy: Some("Equivalent".to_string()),
            rules: Some(vec![RuleWithOperations {
                operations: Some(vec!["CREATE".to_string()]),
                api_groups: Some(vec!["tenancy.dev".to_string()]),
                api_versions: Some(vec!["v1alpha1".to_string()]),
                resources: Some(vec!["enrollrequests".to_string()]),
                scope: Some("Namespaced".to_string()),
            }]),
            client_config: WebhookClientConfig {
                service: Some(ServiceReference {
                    name: registration.service_name.clone(),
                    namespace: registration.service_namespace.clone(),
                    path: Some(MUTATE_ENROLL_REQUESTS_PATH.to_string()),
                    port: Some(i32::from(registration.service_port)),
                }),
                ca_bundle: Some(ByteString(ca_bundle)),
                ..Default::default()
            },
            ..Default::default()
        }]),
    }
}
