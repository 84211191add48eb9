use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use motwatch::batch::{self, BatchOptions, BatchReport, BatchRunner, RetryPolicy, RunControl};
use motwatch::config::{self, Config};
use motwatch::dvla::VehicleEnquiryClient;
use motwatch::models::{CheckResult, MotStatusUpdate, Vrm};
use motwatch::mot::MotService;
use motwatch::store::{MemoryStatusStore, MotStatusStore, PgStore};
use motwatch::{jobs, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Check {
            registration,
            no_persist,
        }) => handle_check(&cfg, &registration, no_persist).await,
        Some(cli::Commands::Batch(args)) => handle_batch(&cfg, args).await,
        Some(cli::Commands::Vehicle { registration, save }) => {
            handle_vehicle(&cfg, &registration, save).await
        }
        Some(cli::Commands::Runs { limit }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_runs(&db, limit).await
        }
        Some(cli::Commands::Migrate) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            db.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Structured logging to stdout, plus OTLP export when
/// OTEL_EXPORTER_OTLP_ENDPOINT is set.
fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "motwatch"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "motwatch=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();
    Ok(())
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    let state = Arc::new(AppState::new(db, cfg)?);
    jobs::mot_refresh::spawn(state.clone());

    let app = motwatch::app(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("motwatch listening on {}", addr);

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested, cancelling active runs");
            }
            shutdown.cancel();
        })
        .await?;

    Ok(())
}

async fn handle_check(cfg: &Config, registration: &str, no_persist: bool) -> anyhow::Result<()> {
    let vrm = Vrm::parse(registration).context("invalid registration")?;
    let mot = MotService::from_config(cfg)?;
    let outcome = mot.check(&vrm).await?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if !no_persist {
        if let Some(update) = MotStatusUpdate::from_outcome(&outcome) {
            let db = PgStore::connect(&cfg.database_url).await?;
            db.record_status(&update).await.context("failed to store result")?;
            println!("Stored.");
        }
    }
    Ok(())
}

async fn handle_batch(cfg: &Config, args: cli::BatchArgs) -> anyhow::Result<()> {
    let mot = MotService::from_config(cfg)?;

    let db = if args.dry_run && !args.registrations.is_empty() {
        None
    } else {
        Some(PgStore::connect(&cfg.database_url).await?)
    };

    let registrations = if !args.registrations.is_empty() {
        args.registrations.clone()
    } else {
        let db = db.as_ref().context("database required to select vehicles")?;
        match args.stale_hours.unwrap_or(cfg.stale_after_hours) {
            0 => db.list_registrations(args.limit).await?,
            hours => db.list_stale_registrations(hours as i64, args.limit).await?,
        }
    };

    if registrations.is_empty() {
        println!("No vehicles to check.");
        return Ok(());
    }

    let mut options = BatchOptions::from_config(cfg);
    if let Some(c) = args.concurrency {
        options.concurrency = c;
    }
    if let Some(b) = args.batch_size {
        options.batch_size = b;
    }
    if let Some(d) = args.delay_ms {
        options.delay_between_batches = std::time::Duration::from_millis(d);
    }
    if let Some(r) = args.retries {
        options.retry = RetryPolicy::with_max_retries(r);
    }
    let rps = args.rate_limit_rps.unwrap_or(cfg.rate_limit_rps);

    let runner = BatchRunner::from_service(&mot).with_rate_limiter(batch::rate_limit::from_rps(rps));

    // Persisting runs are recorded; dry runs only print
    let (store, recorder): (Arc<dyn MotStatusStore>, Option<&PgStore>) = match (&db, args.dry_run)
    {
        (Some(db), false) => (Arc::new(db.clone()) as Arc<dyn MotStatusStore>, Some(db)),
        _ => (Arc::new(MemoryStatusStore::new()) as Arc<dyn MotStatusStore>, None),
    };

    let run_id = Uuid::new_v4();
    if let Some(db) = recorder {
        db.start_batch_run(run_id, "cli", registrations.len()).await?;
    }

    let bar = if args.json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(registrations.len() as u64)
    };
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?,
    );
    let progress_bar = bar.clone();

    let control = RunControl {
        progress: Some(Arc::new(move |p: &batch::Progress| {
            progress_bar.set_position(p.processed as u64);
            progress_bar.set_message(format!("{} ({:.0} ms avg)", p.current, p.avg_latency_ms));
        })),
        ..Default::default()
    };

    let cancel = control.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling after the current chunk...");
            cancel.cancel();
        }
    });

    let result =
        batch::run_bulk_check(&runner, store, run_id, &registrations, &options, &control).await;
    bar.finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            if let Some(db) = recorder {
                db.fail_batch_run(run_id, &e.to_string()).await?;
            }
            return Err(e).context("bulk run aborted");
        }
    };

    if let Some(db) = recorder {
        db.finish_batch_run(&report.summary).await?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &BatchReport) {
    let s = &report.summary;
    println!("Run {}{}", s.run_id, if s.cancelled { " (cancelled)" } else { "" });
    println!(
        "  Submitted: {}  Dropped: {}  Processed: {}  Skipped: {}",
        s.submitted, s.dropped, s.processed, s.skipped
    );
    println!("  Succeeded: {}  Failed: {}", s.succeeded, s.failed);
    println!(
        "  Valid: {}  Due soon: {}  Expired: {}  No record: {}",
        s.by_status.valid, s.by_status.due_soon, s.by_status.expired, s.by_status.no_record
    );
    println!(
        "  Persisted: {}  Persist failures: {}",
        s.persisted, s.persist_failures
    );
    println!(
        "  Elapsed: {:.1}s  Throughput: {:.2}/s  Chunks: {}",
        s.elapsed_ms as f64 / 1000.0,
        s.throughput_per_sec,
        s.chunks
    );

    if !s.dropped_identifiers.is_empty() {
        println!("Dropped identifiers: {:?}", s.dropped_identifiers);
    }
    if !s.errors.is_empty() {
        println!("Errors:");
        for e in &s.errors {
            println!("  {}", e);
        }
    }

    let due: Vec<_> = report
        .results
        .iter()
        .filter_map(|o| match &o.result {
            CheckResult::Success {
                status,
                expiry_date,
                ..
            } if !matches!(status, motwatch::models::MotStatus::Valid) => {
                Some((o.registration.as_str(), status.as_str(), *expiry_date))
            }
            _ => None,
        })
        .collect();
    if !due.is_empty() {
        println!("{:<10} {:<10} {:<12}", "VRM", "STATUS", "EXPIRY");
        for (vrm, status, expiry) in due {
            let expiry = expiry.map(|d| d.to_string()).unwrap_or_else(|| "-".into());
            println!("{:<10} {:<10} {:<12}", vrm, status, expiry);
        }
    }
}

async fn handle_vehicle(cfg: &Config, registration: &str, save: bool) -> anyhow::Result<()> {
    let vrm = Vrm::parse(registration).context("invalid registration")?;
    let key = cfg
        .dvla_api_key
        .as_deref()
        .context("DVLA_API_KEY is not set")?;
    let client = VehicleEnquiryClient::new(&cfg.dvla_api_url, key, cfg.request_timeout(), 3)?;

    let Some(details) = client.lookup(&vrm).await? else {
        println!("No DVLA record for {}.", vrm);
        return Ok(());
    };
    println!("{}", serde_json::to_string_pretty(&details)?);

    if save {
        let db = PgStore::connect(&cfg.database_url).await?;
        db.upsert_vehicle_details(&details).await?;
        println!("Stored.");
    }
    Ok(())
}

async fn handle_runs(db: &PgStore, limit: i64) -> anyhow::Result<()> {
    let runs = db.list_batch_runs(limit).await?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    println!(
        "{:<38} {:<10} {:<10} {:<9} {:<25}",
        "ID", "SOURCE", "STATUS", "VEHICLES", "STARTED"
    );
    for r in runs {
        println!(
            "{:<38} {:<10} {:<10} {:<9} {:<25}",
            r.id,
            r.source,
            r.status,
            r.submitted,
            r.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}
