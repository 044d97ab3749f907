use anyhow::Result;
use async_trait::async_trait;

use crate::binding::Binding;
use crate::processor::BindingResolver;
use crate::store::Store;

/// Multi-tenant resolution: one active binding per channel
pub struct ChannelResolver {
    store: Store,
}

impl ChannelResolver {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BindingResolver for ChannelResolver {
    async fn resolve_binding(&self, chat_id: &str) -> Result<Option<Binding>> {
        self.store.active_channel(chat_id).await
    }
}

/// Single-tenant resolution: the one global settings row applies to every
/// chat, or only to its configured channel when one is set
pub struct GlobalResolver {
    store: Store,
}

impl GlobalResolver {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BindingResolver for GlobalResolver {
    async fn resolve_binding(&self, chat_id: &str) -> Result<Option<Binding>> {
        let settings = self.store.global_settings().await?;

        if settings.target_phrase.is_empty() {
            return Ok(None);
        }
        if let Some(configured) = &settings.channel_id {
            if configured != chat_id {
                return Ok(None);
            }
        }

        Ok(Some(Binding {
            channel_id: chat_id.to_string(),
            link: settings.link,
            style: settings.style,
            target_phrase: settings.target_phrase,
            is_active: true,
        }))
    }
}
