//! A tracked bulk run: recorded in `mot_batch_runs`, persisted to Postgres,
//! guarded so only one runs at a time.

use std::sync::Arc;

use uuid::Uuid;

use crate::batch::{self, BatchOptions, BatchRunner, RunControl, RunPermit};
use crate::mot::MotService;
use crate::store::MotStatusStore;
use crate::AppState;

/// Execute a run to completion. `_permit` is held until the run finishes.
pub async fn execute(
    state: Arc<AppState>,
    mot: MotService,
    run_id: Uuid,
    source: &'static str,
    identifiers: Vec<String>,
    _permit: RunPermit,
) {
    if let Err(e) = state
        .db
        .start_batch_run(run_id, source, identifiers.len())
        .await
    {
        tracing::error!(run_id = %run_id, "failed to record batch run start: {}", e);
    }

    let runner = BatchRunner::from_service(&mot)
        .with_rate_limiter(batch::rate_limit::from_rps(state.config.rate_limit_rps));
    let store: Arc<dyn MotStatusStore> = Arc::new(state.db.clone());
    let options = BatchOptions::from_config(&state.config);
    let control = RunControl {
        progress: None,
        cancel: state.shutdown.child_token(),
    };

    let outcome =
        batch::run_bulk_check(&runner, store, run_id, &identifiers, &options, &control).await;
    let recorded = match outcome {
        Ok(report) => state.db.finish_batch_run(&report.summary).await,
        Err(e) => state.db.fail_batch_run(run_id, &e.to_string()).await,
    };

    if let Err(e) = recorded {
        tracing::error!(run_id = %run_id, "failed to record batch run result: {}", e);
    }
}
