//! Azion Certificate Sync
//!
//! Run-to-completion CLI that copies a cert-manager certificate from a
//! Kubernetes cluster to the Azion digital certificate store.
//!
//! # Usage
//! ```bash
//! azion-cert-sync --cm-name web-cert --azion-name www.example.com \
//!     --azion-username me@example.com --azion-password secret
//! ```

use clap::Parser;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use azion_cert_sync::{sync, AzionClient, CertManagerSource, ClusterCertificateRef, Credentials, SyncError};

#[derive(Parser, Debug)]
#[command(name = "azion-cert-sync", version)]
#[command(about = "Copies a cert-manager certificate to Azion", long_about = None)]
struct Args {
    /// cert-manager certificate name
    #[arg(long)]
    cm_name: String,

    /// cert-manager certificate namespace (defaults to the context's namespace)
    #[arg(long)]
    cm_namespace: Option<String>,

    /// Kube config context (defaults to the current context)
    #[arg(long)]
    kube_context: Option<String>,

    /// Azion certificate name
    #[arg(long)]
    azion_name: String,

    /// Azion API username
    #[arg(long, env = "AZION_CERT_SYNC_USERNAME")]
    azion_username: String,

    /// Azion API password
    #[arg(long, env = "AZION_CERT_SYNC_PASSWORD")]
    azion_password: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(level.to_string())),
        )
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("tracing already initialized");

    match run(args).await {
        Ok(id) => println!("Certificate copied to Azion with the ID \"{id}\""),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<u64, SyncError> {
    let source = CertManagerSource::new();
    let sink = AzionClient::new()?;

    let certificate = ClusterCertificateRef {
        name: args.cm_name,
        namespace: args.cm_namespace,
        context: args.kube_context,
    };
    let credentials = Credentials {
        username: args.azion_username,
        password: args.azion_password,
    };

    sync::run(&source, &sink, &certificate, &args.azion_name, &credentials).await
}
