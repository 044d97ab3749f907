//! Operator tool for channel bindings, global settings and the outcome log.
//!
//! Works directly on the database configured in `config.toml` (or the one
//! given with `--db`), so it can run while the bot is up:
//!
//! ```text
//! channels add -1001234567890 --link https://biostage.example --style bold
//! channels update -1001234567890 --inactive
//! channels preview -1001234567890 "Welcome to BioStage"
//! channels logs --limit 20
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use postlinker::binding::{
    Binding, ChannelPatch, GlobalSettings, NewChannel, OutcomeRecord, SettingsPatch, Style,
    DEFAULT_LINK, DEFAULT_TARGET_PHRASE,
};
use postlinker::config::{BindingMode, Config};
use postlinker::processor::BindingResolver;
use postlinker::resolver::GlobalResolver;
use postlinker::store::Store;
use postlinker::transform;

#[derive(Parser)]
#[command(name = "channels", about = "Manage postlinker channel bindings")]
struct Cli {
    /// Bot configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Use this database instead of the one in the config file
    #[arg(long)]
    db: Option<PathBuf>,

    /// Binding mode for `preview` (defaults to the config file, then multi)
    #[arg(long)]
    mode: Option<BindingMode>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bind a new channel
    Add {
        #[arg(allow_negative_numbers = true)]
        channel_id: String,
        #[arg(long, default_value = DEFAULT_LINK)]
        link: String,
        #[arg(long, default_value = "plain")]
        style: Style,
        #[arg(long, default_value = DEFAULT_TARGET_PHRASE)]
        target: String,
        /// Create the binding disabled
        #[arg(long)]
        inactive: bool,
    },
    /// List all bindings, newest first
    List,
    /// Change some fields of an existing binding
    Update {
        #[arg(allow_negative_numbers = true)]
        channel_id: String,
        #[command(flatten)]
        patch: PatchArgs,
    },
    /// Show or change the single-tenant settings row
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Show recent processing outcomes
    Logs {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Render the rewrite a post would get, without editing anything
    Preview {
        #[arg(allow_negative_numbers = true)]
        channel_id: String,
        text: String,
    },
}

#[derive(Args)]
struct PatchArgs {
    #[arg(long)]
    link: Option<String>,
    #[arg(long)]
    style: Option<Style>,
    #[arg(long)]
    target: Option<String>,
    #[arg(long, conflicts_with = "inactive")]
    active: bool,
    #[arg(long)]
    inactive: bool,
}

impl PatchArgs {
    fn into_patch(self) -> ChannelPatch {
        let is_active = match (self.active, self.inactive) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        ChannelPatch {
            link: self.link,
            style: self.style,
            target_phrase: self.target,
            is_active,
        }
    }
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    Set {
        /// Only handle posts from this chat
        #[arg(long, allow_negative_numbers = true, conflicts_with = "any_channel")]
        channel_id: Option<String>,
        /// Handle posts from every chat
        #[arg(long)]
        any_channel: bool,
        #[arg(long)]
        link: Option<String>,
        #[arg(long)]
        style: Option<Style>,
        #[arg(long)]
        target: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (db_path, mode) = resolve_target(&cli.config, cli.db, cli.mode)?;
    let store = Store::open(&db_path)?;

    match cli.command {
        Command::Add {
            channel_id,
            link,
            style,
            target,
            inactive,
        } => {
            let binding = store
                .create_channel(&NewChannel {
                    channel_id,
                    link,
                    style,
                    target_phrase: target,
                    is_active: !inactive,
                })
                .await?;
            println!("Created {}", format_binding(&binding));
        }
        Command::List => {
            let channels = store.list_channels().await?;
            if channels.is_empty() {
                println!("No channels configured.");
            }
            for binding in &channels {
                println!("{}", format_binding(binding));
            }
        }
        Command::Update { channel_id, patch } => {
            let patch = patch.into_patch();
            if patch.is_empty() {
                bail!("nothing to update");
            }
            match store.update_channel(&channel_id, &patch).await? {
                Some(binding) => println!("Updated {}", format_binding(&binding)),
                None => bail!("Channel not found: {}", channel_id),
            }
        }
        Command::Settings { action } => {
            let settings = match action {
                SettingsAction::Show => store.global_settings().await?,
                SettingsAction::Set {
                    channel_id,
                    any_channel,
                    link,
                    style,
                    target,
                } => {
                    let channel_id = if any_channel {
                        Some(None)
                    } else {
                        channel_id.map(Some)
                    };
                    store
                        .update_global_settings(&SettingsPatch {
                            channel_id,
                            link,
                            style,
                            target_phrase: target,
                        })
                        .await?
                }
            };
            println!("{}", format_settings(&settings));
        }
        Command::Logs { limit } => {
            for record in store.recent_logs(limit).await? {
                println!("{}", format_record(&record));
            }
        }
        Command::Preview { channel_id, text } => {
            let Some(binding) = preview_binding(store, mode, &channel_id).await? else {
                bail!("Channel not found: {}", channel_id);
            };
            if !binding.is_active {
                eprintln!("Binding is inactive; live posts are not rewritten until it is enabled");
            }
            let (rendered, changed) = transform::transform(&text, &binding);
            if !changed {
                eprintln!("Target text '{}' not found; post would be skipped", binding.target_phrase);
            }
            println!("{}", rendered);
        }
    }

    Ok(())
}

/// Pick the database and binding mode. `--db` without `--mode` still reads
/// the mode from the config file when one exists.
fn resolve_target(
    config_path: &Path,
    db: Option<PathBuf>,
    mode: Option<BindingMode>,
) -> Result<(PathBuf, BindingMode)> {
    let load = || {
        Config::load(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))
    };

    match (db, mode) {
        (Some(path), Some(mode)) => Ok((path, mode)),
        (Some(path), None) if !config_path.exists() => Ok((path, BindingMode::default())),
        (Some(path), None) => Ok((path, load()?.binding.mode)),
        (None, mode) => {
            let config = load()?;
            Ok((config.database.path, mode.unwrap_or(config.binding.mode)))
        }
    }
}

/// The binding a preview renders with. In multi mode this ignores the active
/// flag so a disabled binding can be checked before turning it on.
async fn preview_binding(
    store: Store,
    mode: BindingMode,
    channel_id: &str,
) -> Result<Option<Binding>> {
    match mode {
        BindingMode::Multi => store.get_channel(channel_id).await,
        BindingMode::Single => GlobalResolver::new(store).resolve_binding(channel_id).await,
    }
}

fn format_binding(binding: &Binding) -> String {
    format!(
        "{} [{}] \"{}\" -> {} ({})",
        binding.channel_id,
        if binding.is_active { "active" } else { "inactive" },
        binding.target_phrase,
        binding.link,
        binding.style,
    )
}

fn format_settings(settings: &GlobalSettings) -> String {
    format!(
        "channel_id = {}\nlink = {}\nstyle = {}\ntarget_text = \"{}\"",
        settings.channel_id.as_deref().unwrap_or("(any)"),
        settings.link,
        settings.style,
        settings.target_phrase,
    )
}

fn format_record(record: &OutcomeRecord) -> String {
    let mut line = format!(
        "{} {} #{} {}",
        record.created_at.format("%Y-%m-%d %H:%M:%S"),
        record.channel_id,
        record.message_id,
        record.status,
    );
    if let Some(error) = &record.error_text {
        line.push_str(": ");
        line.push_str(error);
    }
    line
}

// ── Tests ──────────────────────────────────────────────────────────────────────
