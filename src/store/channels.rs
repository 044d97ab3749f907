use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::OptionalExtension;

use super::{parse_column, Store};
use crate::binding::{Binding, ChannelPatch, NewChannel};

const CHANNEL_COLUMNS: &str = "channel_id, link, style, target_text, is_active";

impl Store {
    /// Register a new channel binding
    pub async fn create_channel(&self, channel: &NewChannel) -> Result<Binding> {
        if channel.channel_id.trim().is_empty() {
            bail!("channel id must not be empty");
        }
        if channel.link.is_empty() {
            bail!("link must not be empty");
        }
        if channel.target_phrase.is_empty() {
            bail!("target text must not be empty");
        }

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO channels (channel_id, link, style, target_text, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                &channel.channel_id,
                &channel.link,
                channel.style.as_str(),
                &channel.target_phrase,
                channel.is_active,
                Utc::now().to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to create channel {}", channel.channel_id))?;

        Ok(Binding {
            channel_id: channel.channel_id.clone(),
            link: channel.link.clone(),
            style: channel.style,
            target_phrase: channel.target_phrase.clone(),
            is_active: channel.is_active,
        })
    }

    /// All bindings, newest first
    pub async fn list_channels(&self) -> Result<Vec<Binding>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM channels ORDER BY created_at DESC, id DESC",
            CHANNEL_COLUMNS
        ))?;

        let channels = stmt
            .query_map([], parse_binding_row)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list channels")?;

        Ok(channels)
    }

    /// Look up a binding regardless of its active flag
    pub async fn get_channel(&self, channel_id: &str) -> Result<Option<Binding>> {
        let conn = self.conn.lock().await;
        Self::query_channel(&conn, channel_id)
    }

    /// The active binding for a channel, if any
    pub async fn active_channel(&self, channel_id: &str) -> Result<Option<Binding>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!(
                "SELECT {} FROM channels WHERE channel_id = ?1 AND is_active = 1",
                CHANNEL_COLUMNS
            ),
            rusqlite::params![channel_id],
            parse_binding_row,
        )
        .optional()
        .context("Failed to look up active channel")
    }

    /// Apply a partial update. Returns `None` when the channel does not exist.
    pub async fn update_channel(
        &self,
        channel_id: &str,
        patch: &ChannelPatch,
    ) -> Result<Option<Binding>> {
        if patch.link.as_deref() == Some("") {
            bail!("link must not be empty");
        }
        if patch.target_phrase.as_deref() == Some("") {
            bail!("target text must not be empty");
        }

        let conn = self.conn.lock().await;
        let rows = conn
            .execute(
                "UPDATE channels SET
                    link = COALESCE(?2, link),
                    style = COALESCE(?3, style),
                    target_text = COALESCE(?4, target_text),
                    is_active = COALESCE(?5, is_active)
                 WHERE channel_id = ?1",
                rusqlite::params![
                    channel_id,
                    &patch.link,
                    patch.style.map(|s| s.as_str()),
                    &patch.target_phrase,
                    patch.is_active,
                ],
            )
            .with_context(|| format!("Failed to update channel {}", channel_id))?;

        if rows == 0 {
            return Ok(None);
        }
        Self::query_channel(&conn, channel_id)
    }

    fn query_channel(conn: &rusqlite::Connection, channel_id: &str) -> Result<Option<Binding>> {
        conn.query_row(
            &format!("SELECT {} FROM channels WHERE channel_id = ?1", CHANNEL_COLUMNS),
            rusqlite::params![channel_id],
            parse_binding_row,
        )
        .optional()
        .context("Failed to load channel")
    }
}

fn parse_binding_row(row: &rusqlite::Row) -> rusqlite::Result<Binding> {
    Ok(Binding {
        channel_id: row.get(0)?,
        link: row.get(1)?,
        style: parse_column(row, 2)?,
        target_phrase: row.get(3)?,
        is_active: row.get(4)?,
    })
}
