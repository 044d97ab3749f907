use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{parse_column, Store};
use crate::binding::OutcomeRecord;
use crate::processor::OutcomeLog;

pub const MAX_LOG_LIMIT: usize = 200;

impl Store {
    /// Append one outcome record. Rows are never updated afterwards.
    pub async fn append_log(&self, record: &OutcomeRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO logs (channel_id, message_id, status, error_text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                &record.channel_id,
                record.message_id,
                record.status.as_str(),
                &record.error_text,
                record.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to append outcome log")?;
        Ok(())
    }

    /// Most recent outcome records, newest first. `limit` is clamped to 1..=200.
    pub async fn recent_logs(&self, limit: usize) -> Result<Vec<OutcomeRecord>> {
        let limit = limit.clamp(1, MAX_LOG_LIMIT) as i64;
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT channel_id, message_id, status, error_text, created_at
             FROM logs
             ORDER BY created_at DESC, id DESC
             LIMIT ?1",
        )?;

        let records = stmt
            .query_map(rusqlite::params![limit], parse_log_row)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to load outcome logs")?;

        Ok(records)
    }
}

#[async_trait]
impl OutcomeLog for Store {
    async fn append(&self, record: &OutcomeRecord) -> Result<()> {
        self.append_log(record).await
    }
}

fn parse_log_row(row: &rusqlite::Row) -> rusqlite::Result<OutcomeRecord> {
    let created_at: String = row.get(4)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(OutcomeRecord {
        channel_id: row.get(0)?,
        message_id: row.get(1)?,
        status: parse_column(row, 2)?,
        error_text: row.get(3)?,
        created_at,
    })
}
