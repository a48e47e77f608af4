use std::sync::Arc;

use actix_request_identifier::{IdReuse, RequestIdentifier};
use actix_web::web::Data;
use anyhow::Context;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use crate::config::Config;
use crate::database::connect::{create_db_connection_pool, run_migrations};
use crate::notify::{ChannelNotifier, Notifier};

mod config;
mod database;
mod error;
mod idgen;
mod ledger;
mod notify;
mod proto;
mod responses;
mod routes;
mod schedule;
mod scheduler;
mod schema;
mod tier;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    // setup tracing and use bunyan formatter
    let level = config.log_level;
    let formatting_layer = BunyanFormattingLayer::new("loyalty-ledger".into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(filter_fn(move |metadata| *metadata.level() <= level))
        .with(JsonStorageLayer)
        .with(formatting_layer);
    tracing::subscriber::set_global_default(subscriber).context("failed to install tracing subscriber")?;

    let db = create_db_connection_pool(&config)?;
    run_migrations(&db)?;

    // loyalty events go to a dispatcher task; delivery transport lives elsewhere
    let (channel, mut events) = ChannelNotifier::new();
    let notifier: Arc<dyn Notifier> = Arc::new(channel);
    actix_web::rt::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(payload) => info!(%payload, "loyalty event"),
                Err(e) => warn!(error = %e, ?event, "unserializable loyalty event"),
            }
        }
    });

    scheduler::spawn_sweeper(db.clone(), notifier.clone(), config.sweep_interval, config.sweep_on_startup);

    let server = actix_web::HttpServer::new(move || {
        actix_web::App::new()
            .wrap(RequestIdentifier::with_uuid().use_incoming_id(IdReuse::UseIncoming))
            .wrap(TracingLogger::default())
            .app_data(Data::new(db.clone()))
            .app_data(Data::from(notifier.clone()))
            .configure(routes::configure)
    });

    info!(bind_address = %config.bind_address, "starting loyalty ledger");
    server
        .bind(config.bind_address.as_str())
        .with_context(|| format!("failed to bind {}", config.bind_address))?
        .run()
        .await?;
    Ok(())
}
