use std::sync::Arc;

use tracing::{error, info, info_span, Level};
use tracing_subscriber::FmtSubscriber;

use pgguard::config::load_config;
use pgguard::dispatcher::{new_cancel_map, Dispatcher};
use pgguard::memstore::{MemStore, NullExecutor};
use pgguard::server::{wait_for_shutdown, Listener};

fn main() {
    let conf = load_config().expect("could not load config");

    let level: Level = conf.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let _span = info_span!("startup").entered();

    let tokio = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("could not create tokio runtime");

    tokio.block_on(run(conf));
}

/// Wires a bare-bones in-memory metastore and a no-op executor and serves connections
/// until shutdown is requested. A deployment with a real catalog/executor behind it would
/// build its own `Dispatcher` with its own repository implementations instead.
async fn run(conf: &'static pgguard::config::Settings) {
    let store = Arc::new(MemStore::new("default-catalog"));
    let dispatcher = Arc::new(Dispatcher {
        principals: store.clone(),
        groups: store.clone(),
        grants: store.clone(),
        row_filters: store.clone(),
        column_masks: store.clone(),
        introspection: store.clone(),
        audit: store.clone(),
        executor: Arc::new(NullExecutor),
        cancel_map: new_cancel_map(),
    });

    let listener = match Listener::bind(&conf.listen_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "failed to bind listener");
            return;
        }
    };
    info!(address = listener.local_address(), "listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    let serve = tokio::spawn(listener.serve(dispatcher, shutdown_rx));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install ctrl-c handler");
    }
    info!("shutdown requested");
    let _ = shutdown_tx.send(());

    match serve.await {
        Ok(handles) => {
            if let Err(e) = wait_for_shutdown(handles, std::time::Duration::from_secs(30)).await {
                error!(error = %e, "connections still live at shutdown deadline");
            }
        }
        Err(e) => error!(error = %e, "listener task panicked"),
    }
}
