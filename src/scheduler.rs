use std::sync::Arc;
use std::time::Duration;

use actix_web::{rt, web};
use chrono::Utc;
use tracing::{error, info};

use crate::database::connect::DbPool;
use crate::database::expiry::{self, SweepSummary};
use crate::error::LedgerResult;
use crate::notify::Notifier;

/// Runs one full expiry sweep on the blocking thread pool.
pub async fn run_sweep(pool: DbPool, notifier: Arc<dyn Notifier>) -> Option<SweepSummary> {
    let result = web::block(move || -> LedgerResult<SweepSummary> {
        let mut conn = pool.get()?;
        expiry::sweep(&mut conn, notifier.as_ref(), Utc::now().naive_utc())
    })
    .await;
    match result {
        Ok(Ok(summary)) => Some(summary),
        Ok(Err(e)) => {
            error!(error = %e, "scheduled sweep failed");
            None
        }
        Err(e) => {
            error!(error = %e, "scheduled sweep was cancelled");
            None
        }
    }
}

/// Spawns the periodic sweep on the current actix runtime. Without an
/// interval only the startup run (if requested) happens.
pub fn spawn_sweeper(pool: DbPool, notifier: Arc<dyn Notifier>, interval: Option<Duration>, run_on_startup: bool) {
    match interval {
        Some(interval) => {
            info!(interval_secs = interval.as_secs(), run_on_startup, "expiry sweeper scheduled");
            rt::spawn(async move {
                let mut ticker = rt::time::interval(interval);
                // the first tick fires immediately
                if !run_on_startup {
                    ticker.tick().await;
                }
                loop {
                    ticker.tick().await;
                    run_sweep(pool.clone(), notifier.clone()).await;
                }
            });
        }
        None if run_on_startup => {
            info!("expiry sweeper disabled, running once at startup");
            rt::spawn(async move {
                run_sweep(pool, notifier).await;
            });
        }
        None => info!("expiry sweeper disabled"),
    }
}
