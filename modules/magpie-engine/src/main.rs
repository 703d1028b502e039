use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use magpie_common::Config;
use magpie_engine::coordinator::Coordinator;
use magpie_engine::embedder::HttpEmbedder;
use magpie_engine::fetcher::{BearerAuth, DualFetcher, HttpFetcher, RenderFetcher};
use magpie_engine::gate::WhatlangDetector;
use magpie_engine::profiles;
use magpie_engine::store::{MemoryStore, PgStore};
use magpie_engine::traits::{ContentStore, TextEmbedder};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("magpie=info")),
        )
        .init();

    let config = Config::from_env();

    let targets = if config.target == "all" {
        profiles::all()
            .into_iter()
            .filter_map(profiles::profile)
            .collect::<Vec<_>>()
    } else {
        match profiles::profile(&config.target) {
            Some(target) => vec![target],
            None => bail!(
                "Unknown target {:?}; available: {}",
                config.target,
                profiles::all().join(", ")
            ),
        }
    };

    let store: Arc<dyn ContentStore> = match &config.database_url {
        Some(dsn) => {
            let store = PgStore::connect(dsn)
                .await
                .context("Failed to connect to Postgres")?;
            store
                .ensure_schema()
                .await
                .context("Failed to ensure schema")?;
            info!("Using Postgres store");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory store (nothing persists)");
            Arc::new(MemoryStore::new())
        }
    };

    let mut http = HttpFetcher::new();
    if let (Some(token_url), Some(client_id), Some(client_secret)) = (
        config.auth_token_url.clone(),
        config.auth_client_id.clone(),
        config.auth_client_secret.clone(),
    ) {
        http = http.with_auth(BearerAuth {
            token_url,
            client_id,
            client_secret,
        });
    }
    let render = config
        .render_url
        .as_deref()
        .map(|url| RenderFetcher::new(url, config.render_token.as_deref()));
    let fetcher = Arc::new(DualFetcher::new(http, render));

    let embedder: Option<Arc<dyn TextEmbedder>> = config.embed_api_key.as_deref().map(|key| {
        Arc::new(HttpEmbedder::new(&config.embed_base_url, key, &config.embed_model))
            as Arc<dyn TextEmbedder>
    });

    let mut coordinator = Coordinator::new(fetcher, store, Arc::new(WhatlangDetector));
    if let Some(embedder) = embedder {
        coordinator = coordinator.with_embedder(embedder);
    }

    let cancel = coordinator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing current work then stopping");
            cancel.cancel();
        }
    });

    if targets.len() == 1 {
        let stats = coordinator.run_crawl(&targets[0]).await?;
        info!("{stats}");
    } else {
        for (slug, result) in coordinator.run_all(&targets).await {
            match result {
                Ok(stats) => info!(target = slug.as_str(), "{stats}"),
                Err(e) => warn!(target = slug.as_str(), error = %e, "Run failed"),
            }
        }
    }

    Ok(())
}
