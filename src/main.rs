use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use tunnel_origin::config::Config;
use tunnel_origin::ingress::Ingress;
use tunnel_origin::proxy::OriginProxy;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let ingress = Ingress::from_config(&cfg)?;

    let shutdown = CancellationToken::new();
    let tasks = TaskTracker::new();
    let (errors_tx, mut errors_rx) = mpsc::channel(16);

    ingress
        .start_origins(&tasks, shutdown.clone(), errors_tx)
        .await?;

    let proxy = OriginProxy::new(ingress, shutdown.clone());
    for (index, rule) in proxy.ingress().rules().iter().enumerate() {
        tracing::info!(
            rule = index,
            hostname = ?rule.hostname,
            path = rule.path.as_ref().map(|p| p.as_str()),
            origin = rule.service.kind(),
            "Ingress rule"
        );
    }

    let result: anyhow::Result<()> = tokio::select! {
        Some(err) = errors_rx.recv() => {
            tracing::error!(error = %err, "Origin failed");
            Err(err.into())
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            Ok(())
        }
    };

    shutdown.cancel();
    tasks.close();
    tasks.wait().await;

    result
}
