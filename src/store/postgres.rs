use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::MotStatusStore;
use crate::batch::BatchRunSummary;
use crate::dvla::VehicleDetails;
use crate::models::MotStatusUpdate;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests use a lazily connected one).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // -- Vehicle Operations --

    pub async fn get_vehicle(&self, registration: &str) -> anyhow::Result<Option<VehicleRow>> {
        let row = sqlx::query_as::<_, VehicleRow>(
            r#"SELECT registration, make, colour, fuel_type, year_of_manufacture,
                      tax_status, tax_due_date, mot_status, mot_expiry_date,
                      last_mot_test_date, last_checked_at, updated_at
               FROM vehicles WHERE registration = $1"#,
        )
        .bind(registration)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// All tracked registrations, oldest check first.
    pub async fn list_registrations(&self, limit: i64) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            r#"SELECT registration FROM vehicles
               ORDER BY last_checked_at ASC NULLS FIRST, registration
               LIMIT $1"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Registrations never checked, or last checked more than `stale_hours` ago.
    pub async fn list_stale_registrations(
        &self,
        stale_hours: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            r#"SELECT registration FROM vehicles
               WHERE last_checked_at IS NULL
                  OR last_checked_at < NOW() - make_interval(hours => $1::int)
               ORDER BY last_checked_at ASC NULLS FIRST, registration
               LIMIT $2"#,
        )
        .bind(stale_hours as i32)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Store DVLA registration details. MOT columns are left to the MOT check.
    pub async fn upsert_vehicle_details(&self, details: &VehicleDetails) -> anyhow::Result<()> {
        let payload = serde_json::to_value(details)?;
        sqlx::query(
            r#"INSERT INTO vehicles
                   (registration, make, colour, fuel_type, year_of_manufacture,
                    tax_status, tax_due_date, dvla_payload)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (registration) DO UPDATE SET
                   make = COALESCE(EXCLUDED.make, vehicles.make),
                   colour = COALESCE(EXCLUDED.colour, vehicles.colour),
                   fuel_type = COALESCE(EXCLUDED.fuel_type, vehicles.fuel_type),
                   year_of_manufacture = COALESCE(EXCLUDED.year_of_manufacture, vehicles.year_of_manufacture),
                   tax_status = COALESCE(EXCLUDED.tax_status, vehicles.tax_status),
                   tax_due_date = COALESCE(EXCLUDED.tax_due_date, vehicles.tax_due_date),
                   dvla_payload = EXCLUDED.dvla_payload,
                   updated_at = NOW()"#,
        )
        .bind(&details.registration_number)
        .bind(&details.make)
        .bind(&details.colour)
        .bind(&details.fuel_type)
        .bind(details.year_of_manufacture)
        .bind(&details.tax_status)
        .bind(details.tax_due_date)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- Batch Run Operations --

    pub async fn start_batch_run(
        &self,
        id: Uuid,
        source: &str,
        submitted: usize,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO mot_batch_runs (id, source, status, submitted) VALUES ($1, $2, 'running', $3)",
        )
        .bind(id)
        .bind(source)
        .bind(submitted as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn finish_batch_run(&self, summary: &BatchRunSummary) -> anyhow::Result<()> {
        let status = if summary.cancelled { "cancelled" } else { "completed" };
        sqlx::query(
            r#"UPDATE mot_batch_runs
               SET status = $2, summary = $3, finished_at = $4
               WHERE id = $1"#,
        )
        .bind(summary.run_id)
        .bind(status)
        .bind(serde_json::to_value(summary)?)
        .bind(summary.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail_batch_run(&self, id: Uuid, error: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"UPDATE mot_batch_runs
               SET status = 'failed', error = $2, finished_at = NOW()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_batch_runs(&self, limit: i64) -> anyhow::Result<Vec<BatchRunRow>> {
        let rows = sqlx::query_as::<_, BatchRunRow>(
            r#"SELECT id, source, status, submitted, summary, error, started_at, finished_at
               FROM mot_batch_runs
               ORDER BY started_at DESC
               LIMIT $1"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_batch_run(&self, id: Uuid) -> anyhow::Result<Option<BatchRunRow>> {
        let row = sqlx::query_as::<_, BatchRunRow>(
            r#"SELECT id, source, status, submitted, summary, error, started_at, finished_at
               FROM mot_batch_runs WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl MotStatusStore for PgStore {
    async fn record_status(&self, update: &MotStatusUpdate) -> anyhow::Result<()> {
        let payload = (!update.raw_payload.is_null()).then(|| update.raw_payload.clone());
        sqlx::query(
            r#"INSERT INTO vehicles
                   (registration, mot_status, mot_expiry_date, last_mot_test_date,
                    last_checked_at, mot_payload)
               VALUES ($1, $2, $3, $4, $5, $6)
               ON CONFLICT (registration) DO UPDATE SET
                   mot_status = EXCLUDED.mot_status,
                   mot_expiry_date = COALESCE(EXCLUDED.mot_expiry_date, vehicles.mot_expiry_date),
                   last_mot_test_date = COALESCE(EXCLUDED.last_mot_test_date, vehicles.last_mot_test_date),
                   last_checked_at = EXCLUDED.last_checked_at,
                   mot_payload = COALESCE(EXCLUDED.mot_payload, vehicles.mot_payload),
                   updated_at = NOW()"#,
        )
        .bind(&update.registration)
        .bind(update.status.as_str())
        .bind(update.expiry_date)
        .bind(update.last_test_date)
        .bind(update.checked_at)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// -- Rows --

#[derive(Debug, sqlx::FromRow, Serialize, Deserialize)]
pub struct VehicleRow {
    pub registration: String,
    pub make: Option<String>,
    pub colour: Option<String>,
    pub fuel_type: Option<String>,
    pub year_of_manufacture: Option<i32>,
    pub tax_status: Option<String>,
    pub tax_due_date: Option<NaiveDate>,
    pub mot_status: Option<String>,
    pub mot_expiry_date: Option<NaiveDate>,
    pub last_mot_test_date: Option<NaiveDate>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow, Serialize, Deserialize)]
pub struct BatchRunRow {
    pub id: Uuid,
    pub source: String,
    pub status: String,
    pub submitted: i32,
    pub summary: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
