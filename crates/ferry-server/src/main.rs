use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ferry_cluster::{KvStore, MemoryStore, MessageBus, RedisStore, Registry};
use ferry_server::config::FerryConfig;
use ferry_server::{tcp, ws, NodeContext, Router, SessionTable};
use ferry_store::{Database, SqliteStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("FERRY_CONFIG").ok())
        .unwrap_or_else(|| "ferry.toml".to_string());
    let config = FerryConfig::load(Path::new(&config_path))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        node = %config.node.id,
        "starting ferry node"
    );
    if config.uses_dev_secret() {
        warn!("running with the built-in development auth secret");
    }

    // History / group / friend stores.
    let db = if config.database.path == ":memory:" {
        Database::open_in_memory()?
    } else {
        Database::open_at(Path::new(&config.database.path))?
    };
    let store = Arc::new(SqliteStore::new(db));

    // Cluster backend: Redis when configured, otherwise (or on connection
    // failure) an in-process store. Single-node delivery keeps working
    // either way; only cross-node routing needs Redis.
    let kv: Arc<dyn KvStore> = if config.redis.enabled {
        match RedisStore::connect(&config.redis.url).await {
            Ok(redis) => Arc::new(redis),
            Err(err) => {
                warn!(%err, "redis unavailable, continuing with in-process registry");
                Arc::new(MemoryStore::new())
            }
        }
    } else {
        info!("redis disabled, using in-process registry");
        Arc::new(MemoryStore::new())
    };

    let registry = Arc::new(Registry::new(
        kv.clone(),
        config.node.id.clone(),
        config.node.advertise_addr.clone(),
    ));
    // Clear leftovers a previous crash under the same node id may have left.
    if let Err(err) = registry.evict_node(&config.node.id).await {
        warn!(%err, "startup registry eviction failed");
    }

    let bus = Arc::new(MessageBus::new(kv));
    let bus_rx = bus.subscribe(&config.node.id).await?;

    let table = Arc::new(SessionTable::new());
    let router = Arc::new(Router::new(
        config.node.id.clone(),
        table,
        registry,
        bus,
        store.clone(),
        store.clone(),
        store,
    ));

    let bus_task = router.clone().spawn_bus_subscriber(bus_rx);
    let heartbeat_task = router.clone().spawn_heartbeat();

    let shutdown = CancellationToken::new();
    let ctx = NodeContext::new(config, router.clone());

    let mut tcp_task = tokio::spawn(tcp::serve(ctx.clone(), shutdown.clone()));
    let mut tcp_done = false;

    tokio::select! {
        result = ws::serve(ctx.clone(), shutdown.clone()) => {
            if let Err(err) = result {
                error!(%err, "HTTP server failed");
                shutdown.cancel();
                router.shutdown().await;
                return Err(err);
            }
        }
        result = &mut tcp_task => {
            tcp_done = true;
            if let Ok(Err(err)) = result {
                error!(%err, "TCP server failed");
                shutdown.cancel();
                router.shutdown().await;
                return Err(err);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
        }
    }

    shutdown.cancel();
    router.shutdown().await;
    if !tcp_done {
        let _ = tcp_task.await;
    }
    let _ = bus_task.await;
    let _ = heartbeat_task.await;

    info!("node stopped");
    Ok(())
}
