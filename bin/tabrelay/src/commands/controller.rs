use std::sync::Arc;
use std::time::Duration;
use tabrelay_controller::{BrowserController, ControllerClient};
use tabrelay_tools::actions::ActionContext;
use tabrelay_tools::browser::cdp::CdpClient;
use tabrelay_tools::browser::{CdpBackend, SnapshotCache};
use tabrelay_tools::{register_builtin_actions, ActionRegistry};
use tokio::sync::broadcast;
use tracing::info;

const CDP_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run(cdp_endpoint: &str) -> anyhow::Result<()> {
    let (_paths, config, _db) = super::open_workspace()?;

    let ws_url = CdpClient::discover_ws_url(cdp_endpoint).await?;
    info!(url = %ws_url, "Connecting to browser");
    let cdp = CdpClient::connect(&ws_url, CDP_COMMAND_TIMEOUT).await?;

    let registry = Arc::new(ActionRegistry::new());
    register_builtin_actions(
        &registry,
        ActionContext {
            backend: Arc::new(CdpBackend::new(cdp)),
            cache: Arc::new(SnapshotCache::new()),
        },
    );
    info!(actions = ?registry.available_actions(), "Actions registered");

    let client = Arc::new(ControllerClient::new(config.connection.clone()));
    let controller = Arc::new(BrowserController::new(
        config.controller.clone(),
        registry,
        client.clone(),
    ));
    controller.start();

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let client_handle = tokio::spawn(client.run_loop(controller.clone(), shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
    let _ = client_handle.await;

    info!(stats = %controller.stats(), "Controller stopped");
    controller.shutdown();
    Ok(())
}
