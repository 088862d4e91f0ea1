//! Crash report intake: deduplicates submitted issues into bugs by
//! exception signature and serves them back over HTTP.

pub mod api;
pub mod config;
pub mod engine;
pub mod errors;
pub mod metrics_defs;
pub mod query;
pub mod report;
pub mod signature;
pub mod store;
pub mod types;

#[cfg(test)]
mod testutils;

use api::AppState;
use config::Config;
use engine::Deduplicator;
use errors::IntakeError;
use query::QueryService;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use store::Stores;

pub async fn run(config: Config) -> Result<(), IntakeError> {
    config.validate()?;

    let ready = Arc::new(AtomicBool::new(false));
    let admin_task = config.admin_listener.clone().map(|admin| {
        let ready = ready.clone();
        let service = AdminService::<_, IntakeError>::new(move || ready.load(Ordering::Relaxed));
        tokio::spawn(async move { run_http_service(&admin.host, admin.port, service).await })
    });

    let stores = Stores::open(&config.store).await?;
    let state = AppState {
        dedup: Deduplicator::new(
            &stores,
            config.signature_hash.hasher(),
            config.store_timeout(),
        ),
        query: QueryService::new(&stores, config.store_timeout()),
        expose_store_errors: config.expose_store_errors,
    };
    if config.expose_store_errors {
        tracing::warn!("store errors are exposed to clients");
    }
    let app = api::router(state, config.max_body_bytes);
    ready.store(true, Ordering::Relaxed);

    let admin = async move {
        match admin_task {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) => Err(io::Error::other(e).into()),
            },
            None => std::future::pending::<Result<(), IntakeError>>().await,
        }
    };

    tokio::select! {
        result = api::serve(&config.listener, app) => result,
        result = admin => result,
    }
}
