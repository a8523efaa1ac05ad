//! Tenancy Operator - tenant self-enrollment into workspaces

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use kube::Client;
use tokio_util::sync::CancellationToken;

use tenancy::config::{
    tls_files, OperatorConfig, WebhookRegistration, DEFAULT_WEBHOOK_SERVICE_NAME,
    DEFAULT_WEBHOOK_SERVICE_NAMESPACE,
};
use tenancy::controller::{build_enrollment_controller, Context};
use tenancy::crd::all_crds;
use tenancy::install::{ensure_crds_installed, ensure_webhook_config};
use tenancy::telemetry::{init_tracing, LogFormat};
use tenancy::{webhook, DEFAULT_RECONCILE_TIMEOUT_SECS};

/// Tenancy - Kubernetes operator for tenant self-enrollment into workspaces
#[derive(Parser, Debug)]
#[command(name = "tenancy", version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the CRD manifests as YAML and exit
    Crd,

    /// Run the webhook and the controller (default mode)
    Run(RunArgs),
}

/// Run mode arguments
#[derive(Args, Debug)]
struct RunArgs {
    /// Address the admission webhook listens on
    #[arg(long, env = "TENANCY_WEBHOOK_ADDR", default_value = "0.0.0.0:9443")]
    webhook_addr: SocketAddr,

    /// PEM certificate served by the webhook; plain HTTP when unset
    #[arg(long, env = "TENANCY_TLS_CERT_FILE")]
    tls_cert_file: Option<PathBuf>,

    /// PEM private key of the webhook certificate
    #[arg(long, env = "TENANCY_TLS_KEY_FILE")]
    tls_key_file: Option<PathBuf>,

    /// CA bundle of the webhook certificate; installs the MutatingWebhookConfiguration when set
    #[arg(long, env = "TENANCY_WEBHOOK_CA_FILE")]
    webhook_ca_file: Option<PathBuf>,

    /// Service fronting the webhook
    #[arg(long, env = "TENANCY_WEBHOOK_SERVICE_NAME", default_value = DEFAULT_WEBHOOK_SERVICE_NAME)]
    webhook_service_name: String,

    /// Namespace of the Service fronting the webhook
    #[arg(long, env = "TENANCY_WEBHOOK_SERVICE_NAMESPACE", default_value = DEFAULT_WEBHOOK_SERVICE_NAMESPACE)]
    webhook_service_namespace: String,

    /// Deadline of a single reconcile in seconds
    #[arg(long, env = "TENANCY_RECONCILE_TIMEOUT_SECS", default_value_t = DEFAULT_RECONCILE_TIMEOUT_SECS)]
    reconcile_timeout_secs: u64,

    /// Maximum concurrent reconciles, 0 for unbounded
    #[arg(long, env = "TENANCY_CONCURRENCY", default_value_t = 0)]
    concurrency: u16,

    /// Do not install the CRDs at startup
    #[arg(long, env = "TENANCY_SKIP_CRD_INSTALL")]
    skip_crd_install: bool,

    /// Log output format
    #[arg(long, env = "TENANCY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

impl RunArgs {
    fn into_config(self) -> tenancy::Result<OperatorConfig> {
        let registration = self.webhook_ca_file.map(|ca_file| WebhookRegistration {
            ca_file,
            service_name: self.webhook_service_name,
            service_namespace: self.webhook_service_namespace,
            service_port: 443,
        });

        let config = OperatorConfig {
            webhook_addr: self.webhook_addr,
            tls: tls_files(self.tls_cert_file, self.tls_key_file)?,
            registration,
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout_secs),
            concurrency: self.concurrency,
            skip_crd_install: self.skip_crd_install,
            log_format: self.log_format,
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider - FIPS-validated aws-lc-rs
    // This MUST succeed for the webhook and the API client to use TLS.
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Crd) => print_crds(),
        Some(Commands::Run(args)) => run(args).await,
        None => run(cli.run).await,
    }
}

/// Print every CRD as a multi-document YAML stream
fn print_crds() -> anyhow::Result<()> {
    for crd in all_crds() {
        let yaml = serde_yaml::to_string(&crd).context("Failed to serialize CRD")?;
        println!("---\n{yaml}");
    }
    Ok(())
}

/// Run the webhook server and the EnrollRequest controller until shutdown
async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = args.into_config().context("Invalid configuration")?;
    init_tracing(config.log_format)?;

    tracing::info!(
        webhook_addr = %config.webhook_addr,
        tls = config.tls.is_some(),
        reconcile_timeout_secs = config.reconcile_timeout.as_secs(),
        concurrency = config.concurrency,
        "Starting tenancy operator"
    );

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    if config.skip_crd_install {
        tracing::info!("Skipping CRD installation");
    } else {
        ensure_crds_installed(&client)
            .await
            .context("Failed to install CRDs")?;
    }

    if let Some(registration) = &config.registration {
        ensure_webhook_config(&client, registration, config.webhook_addr.port())
            .await
            .context("Failed to install webhook configuration")?;
    }

    let shutdown = CancellationToken::new();
    let ctx = Arc::new(
        Context::from_client(client.clone())
            .with_reconcile_timeout(config.reconcile_timeout)
            .with_shutdown(shutdown.clone()),
    );

    let mut webhook = tokio::spawn(webhook::serve(
        config.webhook_addr,
        config.tls.clone(),
        shutdown.clone(),
    ));

    tracing::info!("Starting controllers...");
    let controller = build_enrollment_controller(client, ctx, config.concurrency);

    let result = tokio::select! {
        _ = controller => {
            tracing::info!("Controller stopped");
            Ok(())
        }
        served = &mut webhook => {
            tracing::error!("Webhook server stopped unexpectedly");
            match served {
                Ok(result) => result.context("Webhook server failed"),
                Err(e) => Err(anyhow::Error::from(e).context("Webhook server task failed")),
            }
        }
    };

    // Stop in-flight reconciles and drain the webhook
    shutdown.cancel();
    if !webhook.is_finished() {
        match webhook.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Webhook server error during shutdown"),
            Err(e) => tracing::error!(error = %e, "Webhook server task failed"),
            Ok(Ok(())) => {}
        }
    }

    tracing::info!("Tenancy operator stopped");
    result
}
