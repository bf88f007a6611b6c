// =============================================================================
// persistence-service binary
// =============================================================================
//
// Standalone process owning the runtime SQLite database and the candle
// store. Every `flowtrace` worker (and the REST facade) talks to it over a
// single Unix domain socket (§0, §4.5).
// =============================================================================

use std::time::Duration;

use flowtrace::config::EngineConfig;
use flowtrace::ipc::server::serve;
use flowtrace::persistence::service::spawn_queue_cleanup_task;
use flowtrace::persistence::{PersistenceConfig, PersistenceService};
use tracing::{error, info};

const QUEUE_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    flowtrace::init_tracing();

    let config = EngineConfig::load("flowtrace_config.json");

    let persistence_config = PersistenceConfig {
        socket_path: config.ipc_socket_path.clone(),
        db_path: config.db_path.clone(),
        candle_store_root: config.candle_store_root.clone(),
        queue_retention_hours: config.queue_retention_hours,
    };

    info!(
        socket_path = %persistence_config.socket_path,
        db_path = %persistence_config.db_path.display(),
        "starting persistence-service"
    );

    let service = match PersistenceService::spawn(persistence_config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to start persistence service");
            std::process::exit(1);
        }
    };

    spawn_queue_cleanup_task(service.clone(), QUEUE_CLEANUP_INTERVAL);

    let socket_path = config.ipc_socket_path.clone();
    if let Err(e) = serve(&socket_path, move |request| {
        let service = service.clone();
        async move { service.handle(request).await }
    })
    .await
    {
        error!(error = %e, "persistence-service IPC server exited");
        std::process::exit(1);
    }
}
