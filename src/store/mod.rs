pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::models::MotStatusUpdate;

pub use memory::MemoryStatusStore;
pub use postgres::PgStore;

/// Destination for per-vehicle MOT status writes. Each call is independent;
/// a failed write must not affect any other.
#[async_trait]
pub trait MotStatusStore: Send + Sync {
    async fn record_status(&self, update: &MotStatusUpdate) -> anyhow::Result<()>;
}
