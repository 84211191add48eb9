//! Background job: periodically re-check vehicles whose MOT status is stale.
//!
//! Shares the run guard with the admin API, so a tick that lands while a
//! manual run is active is skipped rather than queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::AppState;

/// Upper bound on vehicles picked up by a single scheduled run.
const MAX_VEHICLES_PER_RUN: i64 = 10_000;

/// Spawn the refresh loop. No-op when the interval is 0 or the MOT API is
/// not configured. Call this once at startup.
pub fn spawn(state: Arc<AppState>) {
    let hours = state.config.refresh_interval_hours;
    if hours == 0 {
        return;
    }
    if state.mot.is_none() {
        tracing::warn!("scheduled MOT refresh disabled: MOT history API not configured");
        return;
    }

    let period = Duration::from_secs(hours * 3600);
    tokio::spawn(async move {
        let mut interval = time::interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = refresh_stale(&state).await {
                tracing::error!("MOT refresh job failed: {:#}", e);
            }
        }
    });
    tracing::info!(every_hours = hours, "scheduled MOT refresh started");
}

async fn refresh_stale(state: &Arc<AppState>) -> anyhow::Result<()> {
    let Some(mot) = state.mot.clone() else {
        return Ok(());
    };
    let Some(permit) = state.run_guard.try_acquire() else {
        tracing::info!("MOT refresh skipped: another run is in progress");
        return Ok(());
    };

    let registrations = state
        .db
        .list_stale_registrations(state.config.stale_after_hours as i64, MAX_VEHICLES_PER_RUN)
        .await?;
    if registrations.is_empty() {
        tracing::debug!("MOT refresh: nothing stale");
        return Ok(());
    }

    let run_id = Uuid::new_v4();
    tracing::info!(run_id = %run_id, vehicles = registrations.len(), "MOT refresh starting");
    super::bulk_run::execute(state.clone(), mot, run_id, "scheduled", registrations, permit).await;
    Ok(())
}
