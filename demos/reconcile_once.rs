//! Run a single entitlement reconcile cycle.
//!
//! This wires the file-backed store and the AWS Marketplace metering client
//! to the reconciler and runs one cycle, the way a host scheduler would on
//! each watch event or resync.
//!
//! # Running
//!
//! ```bash
//! # any AWS credential source works: env keys, a profile, IRSA, instance metadata
//! export AWS_REGION=us-east-1
//! export CLUSTER_ID="$(kubectl get ns kube-system -o jsonpath='{.metadata.uid}')"
//! cargo run --example reconcile_once
//! ```

use meterwarden::{
    AwsMeteringClient, EntitlementConfig, FileStore, MeterwardenError, Outcome, Reconcile,
    ReconcileRequest, Reconciler, RecordKey,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const NAMESPACE: &str = "upbound-system";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        eprintln!("Reconcile failed: {}", e);
        if let Some(token) = e.obtained_token() {
            eprintln!("A token was obtained but not stored ({} bytes)", token.len());
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<(), MeterwardenError> {
    let config = EntitlementConfig::marketplace();

    let store = Arc::new(FileStore::new("meterwarden-demo")?);
    if let Ok(cluster_id) = std::env::var("CLUSTER_ID") {
        store.set_cluster_identity(&cluster_id).await?;
    }
    store
        .create_record(RecordKey::new(NAMESPACE, config.record_name))
        .await?;
    println!("Store: {}", store.root().display());

    let metering = Arc::new(AwsMeteringClient::from_env().await?);
    let reconciler = Reconciler::new(config, store, metering)?;

    match reconciler.reconcile(&ReconcileRequest::new(NAMESPACE)).await? {
        Outcome::Confirmed => println!("Entitlement confirmed"),
        Outcome::Unconfirmed { recheck_after } => {
            println!("Entitlement signature not valid, recheck in {:?}", recheck_after)
        }
    }
    Ok(())
}
