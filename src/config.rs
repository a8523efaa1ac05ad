//! Operator configuration
//!
//! Built from the command line in `main` and validated once before anything
//! is started.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::telemetry::LogFormat;
use crate::webhook::TlsFiles;
use crate::{Error, DEFAULT_RECONCILE_TIMEOUT_SECS, DEFAULT_WEBHOOK_PORT};

/// Default name of the Service fronting the webhook
pub const DEFAULT_WEBHOOK_SERVICE_NAME: &str = "tenancy-webhook";
/// Default namespace of the Service fronting the webhook
pub const DEFAULT_WEBHOOK_SERVICE_NAMESPACE: &str = "tenancy-system";

/// Where the API server reaches the webhook, for the MutatingWebhookConfiguration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookRegistration {
    /// PEM bundle of the CA that signed the webhook certificate
    pub ca_file: PathBuf,
    /// Service name
    pub service_name: String,
    /// Service namespace
    pub service_namespace: String,
    /// Service port
    pub service_port: u16,
}

/// Runtime configuration of the operator
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Address the webhook listens on
    pub webhook_addr: SocketAddr,
    /// TLS material; plain HTTP when unset
    pub tls: Option<TlsFiles>,
    /// MutatingWebhookConfiguration to install, if any
    pub registration: Option<WebhookRegistration>,
    /// Deadline of a single reconcile
    pub reconcile_timeout: Duration,
    /// Maximum concurrent reconciles, 0 for unbounded
    pub concurrency: u16,
    /// Skip installing the CRDs at startup
    pub skip_crd_install: bool,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            webhook_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_WEBHOOK_PORT)),
            tls: None,
            registration: None,
            reconcile_timeout: Duration::from_secs(DEFAULT_RECONCILE_TIMEOUT_SECS),
            concurrency: 0,
            skip_crd_install: false,
            log_format: LogFormat::default(),
        }
    }
}

impl OperatorConfig {
    /// Check the configuration for inconsistencies and missing files
    pub fn validate(&self) -> Result<(), Error> {
        if self.reconcile_timeout.is_zero() {
            return Err(Error::config("reconcile timeout must be greater than zero"));
        }

        if let Some(tls) = &self.tls {
            for path in [&tls.cert, &tls.key] {
                if !path.is_file() {
                    return Err(Error::config(format!(
                        "TLS file {} does not exist",
                        path.display()
                    )));
                }
            }
        }

        if let Some(registration) = &self.registration {
            if self.tls.is_none() {
                return Err(Error::config(
                    "registering the webhook requires a TLS certificate and key",
                ));
            }
            if !registration.ca_file.is_file() {
                return Err(Error::config(format!(
                    "webhook CA file {} does not exist",
                    registration.ca_file.display()
                )));
            }
            if registration.service_name.is_empty() || registration.service_namespace.is_empty() {
                return Err(Error::config("webhook service name and namespace are required"));
            }
        }

        Ok(())
    }
}

/// Pair a certificate and key, rejecting one without the other
pub fn tls_files(cert: Option<PathBuf>, key: Option<PathBuf>) -> Result<Option<TlsFiles>, Error> {
    match (cert, key) {
        (Some(cert), Some(key)) => Ok(Some(TlsFiles { cert, key })),
        (None, None) => Ok(None),
        _ => Err(Error::config(
            "--tls-cert-file and --tls-key-file must be set together",
        )),
    }
}
