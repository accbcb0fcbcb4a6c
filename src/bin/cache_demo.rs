use std::sync::Arc;
use std::time::Duration;

use courier::cache::*;
use courier::logger::*;
use courier::settings::*;
use courier::storage::*;
use courier::transport::*;

struct DemoFetcher(Arc<FakeTransport>);

#[async_trait::async_trait]
impl ResourceFetcher for DemoFetcher {
    async fn fetch(&self, key: &str) -> Result<String, FetchError> {
        let response = self
            .0
            .send(TransportRequest::new(Method::Get, key))
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        if !response.is_success() {
            return Err(FetchError::Http {
                status: response.status,
            });
        }
        Ok(response.body)
    }
}

// Demonstrates the cached fetch unit: a cold load, a warm load served
// from the persisted store with no network call, and a forced refetch.
//
// $ cargo run --bin cache_demo -- --settings=settings/dev.toml
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let logger = Logger::new_bootstrap();

    let project_settings = parse_settings(cli.settings.as_deref())?;
    logger.reload_filter(&project_settings.log.filter)?;

    let store: Arc<dyn KeyValueStore> = match project_settings.store.backend.as_str() {
        "file" => Arc::new(FileStore::open(&project_settings.store.path)?),
        _ => Arc::new(MemoryStore::new()),
    };

    let transport = Arc::new(FakeTransport::new());
    transport.script(
        Method::Get,
        "/albums",
        FakeOutcome::ok(r#"[{"title":"Kind of Blue"},{"title":"Blue Train"}]"#)
            .with_latency(Duration::from_millis(200)),
    );
    transport.script(
        Method::Get,
        "/albums",
        FakeOutcome::ok(r#"[{"title":"Kind of Blue"},{"title":"Blue Train"},{"title":"Giant Steps"}]"#),
    );

    let albums: CachedResource<serde_json::Value> = CachedResource::new(
        Arc::new(DemoFetcher(transport.clone())),
        store,
        project_settings.cache.to_config(),
    );
    let mut rx = albums.subscribe();

    albums.set_key("/albums");
    loop {
        rx.changed().await?;
        let state = rx.borrow().clone();
        info!(
            pending = state.is_pending,
            error = state.is_error,
            data = ?state.data,
            "cold load"
        );
        if !state.is_pending {
            break;
        }
    }

    // Warm load: the entry is fresh, so no network call happens.
    albums.set_key("/albums");
    rx.changed().await?;
    info!(data = ?rx.borrow().data, calls = transport.log().len(), "warm load, served from cache");

    // Forced refetch skips the freshness check.
    albums.refetch();
    loop {
        rx.changed().await?;
        let state = rx.borrow().clone();
        if !state.is_pending {
            info!(data = ?state.data, calls = transport.log().len(), "after refetch");
            break;
        }
    }

    Ok(())
}
