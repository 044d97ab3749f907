use anyhow::{Context, Result};
use rusqlite::OptionalExtension;

use super::{parse_column, Store};
use crate::binding::{GlobalSettings, SettingsPatch};

impl Store {
    /// The global configuration row, created with defaults on first access
    pub async fn global_settings(&self) -> Result<GlobalSettings> {
        let conn = self.conn.lock().await;
        Self::load_or_create_settings(&conn)
    }

    pub async fn update_global_settings(&self, patch: &SettingsPatch) -> Result<GlobalSettings> {
        let conn = self.conn.lock().await;
        let mut current = Self::load_or_create_settings(&conn)?;

        if let Some(channel_id) = &patch.channel_id {
            current.channel_id = channel_id.clone().filter(|c| !c.is_empty());
        }
        if let Some(link) = &patch.link {
            current.link = link.clone();
        }
        if let Some(style) = patch.style {
            current.style = style;
        }
        if let Some(phrase) = &patch.target_phrase {
            current.target_phrase = phrase.clone();
        }

        conn.execute(
            "UPDATE settings SET channel_id = ?1, link = ?2, style = ?3, target_text = ?4
             WHERE id = 1",
            rusqlite::params![
                &current.channel_id,
                &current.link,
                current.style.as_str(),
                &current.target_phrase,
            ],
        )
        .context("Failed to update settings")?;

        Ok(current)
    }

    fn load_or_create_settings(conn: &rusqlite::Connection) -> Result<GlobalSettings> {
        let existing = conn
            .query_row(
                "SELECT channel_id, link, style, target_text FROM settings WHERE id = 1",
                [],
                |row| {
                    Ok(GlobalSettings {
                        channel_id: row.get(0)?,
                        link: row.get(1)?,
                        style: parse_column(row, 2)?,
                        target_phrase: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("Failed to load settings")?;

        if let Some(settings) = existing {
            return Ok(settings);
        }

        let defaults = GlobalSettings::default();
        conn.execute(
            "INSERT INTO settings (id, channel_id, link, style, target_text)
             VALUES (1, ?1, ?2, ?3, ?4)",
            rusqlite::params![
                &defaults.channel_id,
                &defaults.link,
                defaults.style.as_str(),
                &defaults.target_phrase,
            ],
        )
        .context("Failed to create default settings")?;

        Ok(defaults)
    }
}
