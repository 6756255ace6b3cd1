//! Analytics store: bulk row-JSON insert into ClickHouse (SPEC_FULL.md §4.G).

use crate::event::CanonicalRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use clickhouse::Client;
use tracing::debug;

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Bulk-inserts `records` into `table` in one round trip. All records must
    /// already belong to the same destination table.
    async fn insert_batch(&self, table: &str, records: &[CanonicalRecord]) -> Result<()>;
}

pub struct ClickHouseStore {
    client: Client,
}

impl ClickHouseStore {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::default().with_url(url),
        }
    }
}

#[async_trait]
impl AnalyticsStore for ClickHouseStore {
    async fn insert_batch(&self, table: &str, records: &[CanonicalRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut insert = self
            .client
            .insert(table)
            .with_context(|| format!("opening insert to table {table}"))?;

        for record in records {
            let row = serde_json::to_vec(record).context("serializing record for insert")?;
            insert
                .write(&row)
                .await
                .with_context(|| format!("writing row to table {table}"))?;
        }

        insert.end().await.with_context(|| format!("committing insert to table {table}"))?;
        debug!(table, count = records.len(), "bulk insert committed");
        Ok(())
    }
}
