use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::payloads::{EditMessageTextSetters, SetWebhookSetters};
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, MessageId, ParseMode};
use teloxide::{ApiError, RequestError};
use tracing::{debug, info, warn};

use crate::binding::{InboundPost, Style};
use crate::config::{ParseModeConfig, WebhookConfig};
use crate::processor::{EditGateway, GatewayError, PostProcessor};

impl From<ParseModeConfig> for Option<ParseMode> {
    fn from(mode: ParseModeConfig) -> Self {
        match mode {
            ParseModeConfig::Html => Some(ParseMode::Html),
            ParseModeConfig::Markdownv2 => Some(ParseMode::MarkdownV2),
            ParseModeConfig::None => None,
        }
    }
}

/// Edits channel posts through the Bot API `editMessageText` method
pub struct TelegramGateway {
    bot: Bot,
    parse_mode: Option<ParseMode>,
}

impl TelegramGateway {
    pub fn new(bot: Bot, parse_mode: ParseModeConfig) -> Self {
        Self {
            bot,
            parse_mode: parse_mode.into(),
        }
    }
}

#[async_trait]
impl EditGateway for TelegramGateway {
    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        style: Style,
    ) -> std::result::Result<(), GatewayError> {
        debug!(chat_id, message_id, %style, "editing channel post");

        let mut request = self
            .bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), text);
        if let Some(mode) = self.parse_mode {
            request = request.parse_mode(mode);
        }

        request.await.map(|_| ()).map_err(classify_error)
    }
}

fn classify_error(error: RequestError) -> GatewayError {
    let description = error.to_string();
    match error {
        RequestError::Api(ApiError::MessageNotModified | ApiError::MessageToEditNotFound) => {
            GatewayError::Conflict(description)
        }
        RequestError::Api(_) => GatewayError::Rejected(description),
        RequestError::Network(_) => GatewayError::Network(description),
        _ => GatewayError::Other(description),
    }
}

pub fn inbound_from_message(msg: &Message) -> InboundPost {
    InboundPost {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
        text: msg.text().map(str::to_string),
    }
}

/// Receive channel posts by long polling.
///
/// On ctrl-c the dispatcher stops fetching updates and lets handlers that
/// already started finish, so every accepted post still gets its record.
pub async fn run_polling(bot: Bot, processor: Arc<PostProcessor>) -> Result<()> {
    info!("Starting Telegram long polling...");

    let handler = Update::filter_channel_post().endpoint(handle_channel_post);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![processor])
        .enable_ctrlc_handler()
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_channel_post(msg: Message, processor: Arc<PostProcessor>) -> ResponseResult<()> {
    let post = inbound_from_message(&msg);
    if let Some(record) = processor.process(post).await {
        debug!(
            chat_id = %record.channel_id,
            message_id = record.message_id,
            status = %record.status,
            "channel post processed"
        );
    }
    Ok(())
}

/// Point Telegram at our webhook endpoint
pub async fn register_webhook(bot: &Bot, webhook: &WebhookConfig) -> Result<()> {
    let url = url::Url::parse(&webhook.url)
        .with_context(|| format!("Invalid webhook url: {}", webhook.url))?;

    let mut request = bot
        .set_webhook(url)
        .allowed_updates(vec![AllowedUpdate::ChannelPost]);
    match &webhook.secret {
        Some(secret) => request = request.secret_token(secret.clone()),
        None => warn!("Webhook secret is not set; any caller can post updates"),
    }

    request.await.context("Failed to register webhook")?;
    info!("Webhook registered at {}", webhook.url);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode_mapping() {
        assert_eq!(Option::<ParseMode>::from(ParseModeConfig::Html), Some(ParseMode::Html));
        assert_eq!(
            Option::<ParseMode>::from(ParseModeConfig::Markdownv2),
            Some(ParseMode::MarkdownV2)
        );
        assert_eq!(Option::<ParseMode>::from(ParseModeConfig::None), None);
    }

    #[test]
    fn test_not_modified_is_a_conflict() {
        let err = classify_error(RequestError::Api(ApiError::MessageNotModified));
        assert!(matches!(err, GatewayError::Conflict(_)));
    }

    #[test]
    fn test_other_api_errors_are_rejections() {
        let err = classify_error(RequestError::Api(ApiError::BotKicked));
        assert!(matches!(err, GatewayError::Rejected(_)));
        assert!(err.to_string().contains(&ApiError::BotKicked.to_string()));
    }
}
