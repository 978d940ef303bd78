//! `statebus serve`: the collector daemon.

use std::sync::Arc;

use statebus_api::bus::{BusConnector, FileBus, MemoryBus};
use statebus_api::transport::WsDialer;
use statebus_config::BusKind;
use statebus_core::{CollectorRegistry, ConfigStore, SchemaRegistry, StateServer, TargetDirectory};
use tokio_util::sync::CancellationToken;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let config = statebus_config::load_config(global.config.as_deref())?;
    let server_config = config.server_config()?;
    let collector_config = config.collector_config()?;
    let seeds = config.seed_targets()?;

    let schema = SchemaRegistry::builtin().get(&collector_config.schema)?;
    let store = Arc::new(ConfigStore::new(schema));
    let connector: Arc<dyn BusConnector> = match config.bus.kind {
        BusKind::Memory => {
            tracing::warn!("using the in-memory bus, published state is lost on exit");
            Arc::new(MemoryBus::new())
        }
        BusKind::File => {
            let dir = config.bus_dir();
            tracing::info!(dir = %dir.display(), "using file bus");
            Arc::new(FileBus::new(dir))
        }
    };
    let registry = CollectorRegistry::new(collector_config, Arc::new(WsDialer::new()), connector, store);
    let server = StateServer::new(server_config, registry, Arc::new(TargetDirectory::new()));
    let listener = server.bind().await?;

    // A target that cannot be reached yet keeps its entries in the store.
    for seed in seeds {
        let target = seed.config.name.clone();
        match server.seed_target(seed.config, &seed.state_entries).await {
            Ok(()) => tracing::info!(%target, entries = seed.state_entries.len(), "target seeded"),
            Err(e) => tracing::warn!(%target, error = %e.chain(), "seeding target failed"),
        }
    }
    server.mark_ready();

    let cancel = CancellationToken::new();
    let serving = tokio::spawn({
        let server = server.clone();
        let cancel = cancel.clone();
        async move { server.serve(listener, cancel).await }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    cancel.cancel();
    match serving.await {
        Ok(Err(e)) => tracing::warn!(error = %e.chain(), "listener failed"),
        Err(e) => tracing::warn!(error = %e, "listener task panicked"),
        Ok(Ok(())) => {}
    }
    server.shutdown().await?;
    Ok(())
}
