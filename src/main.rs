//! Reminder Bot daemon
//!
//! CLI for running the poll loop and inspecting its persisted state.

use anyhow::Context;
use clap::{Parser, Subcommand};
use reminder_bot::bot::Bot;
use reminder_bot::config::Config;
use reminder_bot::cursor::UpdateCursor;
use reminder_bot::dispatcher::numbered_lines;
use reminder_bot::liveness;
use reminder_bot::store::ScheduleStore;
use reminder_bot::telegram::TelegramClient;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Reminder Bot - chat reminder daemon
#[derive(Parser)]
#[command(name = "reminder-bot", version)]
#[command(about = "Fire chat reminders on time, managed through bot commands")]
struct Cli {
    /// Directory holding the schedule, cursor and version files
    #[arg(long, global = true, env = "REMINDER_BOT_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Bot API token
    #[arg(long, global = true, env = "TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Bot API base URL
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// IANA time zone reminders are written in
    #[arg(long, global = true, env = "REMINDER_BOT_TIMEZONE")]
    timezone: Option<String>,

    /// Liveness endpoint address
    #[arg(long, global = true, env = "REMINDER_BOT_BIND")]
    bind: Option<String>,

    /// Exit after this many minutes (0 = never)
    #[arg(long, global = true)]
    max_runtime_mins: Option<u64>,

    /// Name shown in replies and notifications
    #[arg(long, global = true)]
    bot_name: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (default)
    Run,

    /// Print stored reminders
    List {
        /// Only reminders visible to this chat
        #[arg(long)]
        chat: Option<i64>,
    },

    /// Print the last consumed update id
    Cursor,
}

impl Cli {
    fn config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.state_dir {
            Some(dir) => Config::with_state_dir(dir),
            None => Config::default(),
        };
        if let Some(token) = &self.token {
            config.token = Some(token.clone());
        }
        if let Some(api_base) = &self.api_base {
            config.api_base = api_base.clone();
        }
        if let Some(tz) = &self.timezone {
            config.timezone = Config::parse_timezone(tz)?;
        }
        if let Some(bind) = &self.bind {
            config.liveness_bind = bind.clone();
        }
        if let Some(mins) = self.max_runtime_mins {
            config.max_runtime = (mins > 0).then(|| Duration::from_secs(mins * 60));
        }
        if let Some(name) = &self.bot_name {
            config.bot_name = name.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_run(config).await,
        Commands::List { chat } => cmd_list(&config, chat),
        Commands::Cursor => cmd_cursor(&config),
    }
}

async fn cmd_run(config: Config) -> anyhow::Result<()> {
    let transport = TelegramClient::new(&config).context("Failed to set up bot API client")?;
    let bot = Bot::new(config.clone(), transport).context("Failed to load bot state")?;

    let reminders = bot.store().load()?.len();
    info!(
        version = %bot.version(),
        cursor = bot.cursor().last(),
        reminders,
        "{} starting",
        config.bot_name
    );

    let (_addr, _liveness) = liveness::spawn(&config.liveness_bind, &config.bot_name, bot.version())
        .await
        .with_context(|| format!("Failed to bind liveness endpoint {}", config.liveness_bind))?;

    bot.run_until(async {
        signal::ctrl_c().await.ok();
    })
    .await?;

    info!("{} stopped", config.bot_name);
    Ok(())
}

fn cmd_list(config: &Config, chat: Option<i64>) -> anyhow::Result<()> {
    let store = ScheduleStore::new(config);

    let reminders = match chat {
        Some(chat_id) => store.list(chat_id)?,
        None => store.load()?,
    };

    if reminders.is_empty() {
        println!("No reminders");
        return Ok(());
    }

    for (line, reminder) in numbered_lines(&reminders, true).iter().zip(&reminders) {
        match reminder.target {
            Some(target) => println!("{}  (chat {})", line, target),
            None => println!("{}  (any chat)", line),
        }
    }
    Ok(())
}

fn cmd_cursor(config: &Config) -> anyhow::Result<()> {
    let cursor = UpdateCursor::load(&config.cursor_file)?;
    println!("{}", cursor.last());
    Ok(())
}
