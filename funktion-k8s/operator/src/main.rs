//! Funktion Kubernetes operator
use envconfig::Envconfig;
use errors::Error;
use kube::Client;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};

mod cluster;
mod config;
mod errors;
mod informer;
mod operator;
mod queue;
mod reconciliation;
mod workload;

/// Main entry point
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = run().await {
        error!("Operator failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Error> {
    let config = config::OperatorConfig::init_from_env()?;
    let client = Client::try_default().await?;
    let stop = stop_on_signal()?;

    match &config.namespace {
        Some(namespace) => info!("Starting operator in namespace {namespace}"),
        None => info!("Starting operator in all namespaces"),
    }
    let apis = operator::Apis::from_client(client, config.namespace.clone());
    operator::run(apis, &config, stop).await;
    info!("Operator stopped");
    Ok(())
}

/// Raise the returned stop signal on SIGINT or SIGTERM
fn stop_on_signal() -> Result<watch::Receiver<bool>, Error> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let (stop, stopped) = watch::channel(false);
    tokio::spawn(async move {
        tokio::select! {
            _ = terminate.recv() => info!("Received SIGTERM"),
            _ = interrupt.recv() => info!("Received SIGINT"),
        }
        stop.send_replace(true);
    });
    Ok(stopped)
}
