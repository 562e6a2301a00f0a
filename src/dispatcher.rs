//! Command dispatcher - maps one inbound text to a store operation and replies
//!
//! Nothing here fails outward: every error becomes a reply to the sender.

use crate::error::{Error, Result};
use crate::store::{ChatId, Reminder, ScheduleStore};
use crate::transport::OutboundMessage;
use crate::trigger::Trigger;
use chrono::NaiveDateTime;
use tracing::{debug, error};

/// Parsed form of an inbound text
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Help,
    /// `/add` without arguments
    AddUsage,
    Add(String),
    List,
    StatusList,
    Remove(usize),
    /// `/remove` without a usable number
    RemoveUsage,
    Clear,
    /// Bare `<trigger> <message>` text
    Schedule(String),
    Unrecognized,
}

impl Command {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let (head, rest) = match text.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (text, ""),
        };

        if !head.starts_with('/') {
            return if Trigger::starts_trigger(text) {
                Command::Schedule(text.to_string())
            } else {
                Command::Unrecognized
            };
        }

        // Group chats address commands as /list@SomeBot
        let name = head.split('@').next().unwrap_or(head);
        match name {
            "/start" => Command::Start,
            "/help" => Command::Help,
            "/add" if rest.is_empty() => Command::AddUsage,
            "/add" => Command::Add(rest.to_string()),
            "/list" => Command::List,
            "/status_list" => Command::StatusList,
            "/remove" => rest
                .split_whitespace()
                .next()
                .and_then(|n| n.parse::<usize>().ok())
                .map_or(Command::RemoveUsage, Command::Remove),
            "/clear" => Command::Clear,
            _ => Command::Unrecognized,
        }
    }
}

/// Per-process facts the replies mention
#[derive(Debug, Clone, Copy)]
pub struct DispatchContext<'a> {
    pub bot_name: &'a str,
    pub version: &'a str,
    /// Shown on `/start` when the version changed since it was last announced
    pub version_notice: Option<&'a str>,
}

/// Replies for one dispatched text
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub command: Command,
    pub replies: Vec<OutboundMessage>,
}

/// Handle `text` from `chat_id`. `now` is the local wall-clock time.
pub fn dispatch(
    store: &ScheduleStore,
    ctx: &DispatchContext<'_>,
    chat_id: ChatId,
    text: &str,
    now: NaiveDateTime,
) -> Dispatch {
    let command = Command::parse(text);
    debug!(chat_id, ?command, "Dispatching");

    let replies = match handle(store, ctx, chat_id, &command, now) {
        Ok(replies) => replies,
        Err(e) => {
            error!(chat_id, ?command, "Command failed: {}", e);
            vec![OutboundMessage::new(
                chat_id,
                format!("{} : ⚠️ Something went wrong, please try again", header(ctx)),
            )]
        }
    };

    Dispatch { command, replies }
}

fn handle(
    store: &ScheduleStore,
    ctx: &DispatchContext<'_>,
    chat_id: ChatId,
    command: &Command,
    now: NaiveDateTime,
) -> Result<Vec<OutboundMessage>> {
    let reply = |text: String| vec![OutboundMessage::new(chat_id, text)];

    match command {
        Command::Start => {
            let mut welcome = format!(
                "{name} is running...\n👋 Welcome to {name}!\nReady for your schedule.\nType /help to see what I can do.\n\nv{version}",
                name = header(ctx),
                version = ctx.version,
            );
            if let Some(notice) = ctx.version_notice {
                welcome.push_str(&format!("\n🆕 {}", notice));
            }
            let keyboard = OutboundMessage {
                chat_id,
                text: "[ 🤖 ] Available commands".to_string(),
                keyboard: true,
            };
            Ok(vec![OutboundMessage::new(chat_id, welcome), keyboard])
        }
        Command::Help => Ok(reply(help_text(ctx))),
        Command::AddUsage => Ok(reply(format!(
            "{} : Send it as <time> <message>\nExample: Mon 18:00 Team meeting",
            header(ctx)
        ))),
        Command::Add(args) => add(store, ctx, chat_id, args, now, true),
        Command::Schedule(text) => add(store, ctx, chat_id, text, now, false),
        Command::List => render_list(store, ctx, chat_id, false),
        Command::StatusList => render_list(store, ctx, chat_id, true),
        Command::Remove(index) => match store.remove(chat_id, *index) {
            Ok(removed) => Ok(reply(format!(
                "{}\n🗑️ Removed: {}",
                header(ctx),
                entry_line(&removed)
            ))),
            Err(Error::NotFound(_)) => Ok(reply(format!(
                "{} : ❌ No reminder with that number",
                header(ctx)
            ))),
            Err(e) => Err(e),
        },
        Command::RemoveUsage => Ok(reply(format!("{} : ❌ Use /remove N", header(ctx)))),
        Command::Clear => {
            let removed = store.clear(chat_id)?;
            debug!(chat_id, removed, "Cleared reminders");
            Ok(reply(format!("{} : 🧹 Your reminders are cleared", header(ctx))))
        }
        Command::Unrecognized => Ok(reply(format!(
            "{} : ❌ I don't understand that. Try <time> <message>\nExample: Mon 18:00 Team meeting",
            header(ctx)
        ))),
    }
}

fn add(
    store: &ScheduleStore,
    ctx: &DispatchContext<'_>,
    chat_id: ChatId,
    args: &str,
    now: NaiveDateTime,
    explicit: bool,
) -> Result<Vec<OutboundMessage>> {
    let added = Trigger::parse_command_args(args, now)
        .and_then(|(trigger, message)| store.add(chat_id, trigger, &message));

    let text = match added {
        Ok(reminder) => format!("{}\n✅ Added: {}", header(ctx), entry_line(&reminder)),
        Err(Error::Validation(reason)) if explicit => format!(
            "{} : ❌ Wrong format, use /add <time> <message>\nExample: /add Mon 19:00 Meeting\nError: {}",
            header(ctx),
            reason
        ),
        Err(Error::Validation(reason)) => format!(
            "{} : ❌ I don't understand that. Try <time> <message>\nExample: Mon 18:00 Team meeting\nError: {}",
            header(ctx),
            reason
        ),
        Err(e) => return Err(e),
    };
    Ok(vec![OutboundMessage::new(chat_id, text)])
}

fn render_list(
    store: &ScheduleStore,
    ctx: &DispatchContext<'_>,
    chat_id: ChatId,
    with_status: bool,
) -> Result<Vec<OutboundMessage>> {
    let reminders = store.list(chat_id)?;
    if reminders.is_empty() {
        return Ok(vec![OutboundMessage::new(
            chat_id,
            format!("{} : 📭 You have no reminders yet", header(ctx)),
        )]);
    }

    let title = if with_status {
        "⏱️ Reminder status:"
    } else {
        "📋 Your reminders:"
    };
    let text = format!(
        "{}\n{}\n{}",
        header(ctx),
        title,
        numbered_lines(&reminders, with_status).join("\n")
    );
    Ok(vec![OutboundMessage::new(chat_id, text)])
}

/// `1. 18:00 → Team sync`, optionally with a fired/pending mark
pub fn numbered_lines(reminders: &[Reminder], with_status: bool) -> Vec<String> {
    reminders
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let mut line = format!("{}. {}", i + 1, entry_line(r));
            if with_status {
                line.push_str(if r.fired { " ✅" } else { " ⏳" });
            }
            line
        })
        .collect()
}

fn entry_line(reminder: &Reminder) -> String {
    format!("{} → {}", reminder.trigger, reminder.message)
}

fn header(ctx: &DispatchContext<'_>) -> String {
    format!("[ 🤖 ] {}", ctx.bot_name)
}

fn help_text(ctx: &DispatchContext<'_>) -> String {
    format!(
        "{}\n📝 Commands:\n\
         • /add <time> <message> add a reminder\n\
         • /list show your reminders\n\
         • /remove N delete reminder number N\n\
         • /clear delete all your reminders\n\
         • /status_list show which reminders already fired\n\
         ⏰ Time forms:\n\
         • HH:MM every day\n\
         • Mon..Sun HH:MM next such day\n\
         • YYYY-MM-DD HH:MM once\n\
         You can also skip /add and just send <time> <message>.",
        header(ctx)
    )
}
