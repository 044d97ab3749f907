use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rendering style of the inserted hyperlink
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    Plain,
    Bold,
    Italic,
}

impl Style {
    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Plain => "plain",
            Style::Bold => "bold",
            Style::Italic => "italic",
        }
    }
}

impl std::fmt::Display for Style {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Style {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(Style::Plain),
            "bold" => Ok(Style::Bold),
            "italic" => Ok(Style::Italic),
            other => Err(format!(
                "unknown style '{}' (expected plain, bold or italic)",
                other
            )),
        }
    }
}

/// Configuration tying a channel to a target phrase, link and style
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Binding {
    pub channel_id: String,
    pub link: String,
    pub style: Style,
    pub target_phrase: String,
    pub is_active: bool,
}

pub const DEFAULT_LINK: &str = "https://example.com";
pub const DEFAULT_TARGET_PHRASE: &str = "BioStage";

/// Payload for registering a new channel binding
#[derive(Debug, Clone)]
pub struct NewChannel {
    pub channel_id: String,
    pub link: String,
    pub style: Style,
    pub target_phrase: String,
    pub is_active: bool,
}

impl NewChannel {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            link: DEFAULT_LINK.to_string(),
            style: Style::Plain,
            target_phrase: DEFAULT_TARGET_PHRASE.to_string(),
            is_active: true,
        }
    }
}

/// Partial update for a channel binding. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ChannelPatch {
    pub link: Option<String>,
    pub style: Option<Style>,
    pub target_phrase: Option<String>,
    pub is_active: Option<bool>,
}

impl ChannelPatch {
    pub fn is_empty(&self) -> bool {
        self.link.is_none()
            && self.style.is_none()
            && self.target_phrase.is_none()
            && self.is_active.is_none()
    }
}

/// The single global configuration row used in single-tenant deployments
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalSettings {
    /// When set, only posts from this chat are handled
    pub channel_id: Option<String>,
    pub link: String,
    pub style: Style,
    pub target_phrase: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            channel_id: None,
            link: DEFAULT_LINK.to_string(),
            style: Style::Plain,
            target_phrase: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsPatch {
    /// `Some(None)` clears the channel filter
    pub channel_id: Option<Option<String>>,
    pub link: Option<String>,
    pub style: Option<Style>,
    pub target_phrase: Option<String>,
}

/// A channel post as delivered by the transport layer
#[derive(Debug, Clone)]
pub struct InboundPost {
    pub chat_id: i64,
    pub message_id: i32,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Skipped,
    Error,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Skipped => "skipped",
            OutcomeStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutcomeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(OutcomeStatus::Success),
            "skipped" => Ok(OutcomeStatus::Skipped),
            "error" => Ok(OutcomeStatus::Error),
            other => Err(format!("unknown outcome status '{}'", other)),
        }
    }
}

/// Append-only log entry describing the result of processing one post
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeRecord {
    pub channel_id: String,
    pub message_id: i32,
    pub status: OutcomeStatus,
    pub error_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn success(channel_id: impl Into<String>, message_id: i32) -> Self {
        Self::new(channel_id, message_id, OutcomeStatus::Success, None)
    }

    pub fn skipped(channel_id: impl Into<String>, message_id: i32, reason: &str) -> Self {
        Self::new(
            channel_id,
            message_id,
            OutcomeStatus::Skipped,
            Some(reason.to_string()),
        )
    }

    pub fn error(channel_id: impl Into<String>, message_id: i32, reason: String) -> Self {
        Self::new(channel_id, message_id, OutcomeStatus::Error, Some(reason))
    }

    fn new(
        channel_id: impl Into<String>,
        message_id: i32,
        status: OutcomeStatus,
        error_text: Option<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            message_id,
            status,
            error_text,
            created_at: Utc::now(),
        }
    }
}
