//! Daemon wiring

use std::future::Future;
use std::sync::Arc;

use tracing::info;

use harbor_ddns::{DynamicDnsUpdater, NoIpProvider};
use harbor_listener::TcpNetworkListener;
use harbor_settings::SettingsStore;
use harbor_upnp::IgdPortMapper;

use crate::{ControllerConfig, DaemonService, IpcConfig, IpcServer, ListenerController, Result};

/// Run the daemon with the production collaborators until ctrl-c
pub async fn run(store: SettingsStore, ipc_config: IpcConfig) -> Result<()> {
    run_until(store, ipc_config, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal");
    })
    .await
}

/// Run the daemon until `shutdown` resolves, then stop the listener
pub async fn run_until<F>(store: SettingsStore, ipc_config: IpcConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    info!("Starting Harbor daemon...");

    let ddns = Arc::new(DynamicDnsUpdater::new(Arc::new(NoIpProvider::new()?)));
    let (controller, controller_task) = ListenerController::new(
        ControllerConfig::default(),
        Arc::new(TcpNetworkListener::default()),
        Arc::new(IgdPortMapper::default()),
        ddns,
    )
    .spawn();

    let daemon = Arc::new(DaemonService::new(store, controller.clone())?);
    daemon.auto_listen().await;

    info!("Daemon starting, will listen on {:?}", ipc_config.socket_path);
    let mut ipc = IpcServer::new(ipc_config);

    let result = tokio::select! {
        result = ipc.start(daemon.clone()) => result,
        _ = shutdown => {
            ipc.stop().await;
            let _ = std::fs::remove_file(ipc.socket_path());
            Ok(())
        }
    };

    let _ = controller.shutdown().await;
    let _ = controller_task.await;

    info!("Daemon stopped");
    result
}
