/**
 * FLEET CONTROLLER - Point d'entrée du contrôleur d'unités distantes
 *
 * RÔLE : bootstrap du store, du cache de statut, du remote link, de la
 * boucle de sync et de l'API REST.
 *
 * ARCHITECTURE : API REST (axum) + store JSON + cache mémoire partagé
 * + une task de fond qui rafraîchit le statut des unités.
 */

mod cache;
mod config;
mod error;
mod health;
mod http;
mod logging;
mod models;
mod remote;
mod store;
mod sync;
mod tokens;
mod units;

#[cfg(test)]
mod test_support;

use crate::cache::StatusCache;
use crate::config::load_config;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::remote::HttpRemoteLink;
use crate::store::JsonUnitStore;
use crate::sync::SyncLoop;
use crate::tokens::TokenIssuer;
use crate::units::UnitService;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();
    logging::init();

    let cfg = load_config().await;

    let store = Arc::new(
        JsonUnitStore::open(&cfg.data_file)
            .await
            .with_context(|| format!("failed to open unit store {}", cfg.data_file.display()))?,
    );
    let remote = Arc::new(HttpRemoteLink::new(&cfg.remote).context("failed to build remote link")?);

    // cache partagé : une seule init au boot
    let cache = Arc::new(StatusCache::new());
    cache.init();

    let tokens = Arc::new(TokenIssuer::new(cfg.tokens.ttl()));
    let units = UnitService::new(store.clone(), remote.clone(), cache.clone(), tokens);

    let sync = SyncLoop::new(store, remote, cache.clone(), cfg.sync.interval()).spawn();

    let api_key = std::env::var("FLEET_API_KEY").ok().filter(|k| !k.is_empty());
    if api_key.is_none() {
        warn!("FLEET_API_KEY not set, only /health and unit registration are reachable");
    }

    let app_state = AppState {
        units,
        cache,
        health: HealthTracker::new(sync.monitor()),
        api_key: api_key.map(Arc::from),
    };
    let app = http::build_router(app_state);

    let listener = TcpListener::bind(&cfg.listen_address)
        .await
        .with_context(|| format!("failed to bind {}", cfg.listen_address))?;
    info!(address = %cfg.listen_address, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("http server error")?;

    sync.stop().await;
    Ok(())
}
