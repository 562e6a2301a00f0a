//! Poll loop - the single owner of the schedule store, cursor and active target
//!
//! Each tick runs strictly in order: pull and dispatch updates, fire due
//! reminders, prune and re-arm, check the runtime watchdog.

use crate::config::Config;
use crate::cursor::UpdateCursor;
use crate::dispatcher::{self, Command, DispatchContext};
use crate::error::Result;
use crate::matcher;
use crate::store::{write_atomic, ChatId, ScheduleStore};
use crate::transport::{OutboundMessage, Transport};
use crate::trigger::truncate_to_minute;
use chrono::{Duration, NaiveDateTime, Utc};
use chrono_tz::Tz;
use std::fs;
use std::future::Future;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// How far back a slow tick may catch up on minutes it skipped.
/// A fresh process starts at the current minute and never fires retroactively.
pub const MAX_CATCH_UP_MINUTES: i64 = 5;

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub dispatched: usize,
    pub fired: usize,
    pub pruned: usize,
    pub rearmed: usize,
    /// Watchdog expired; the loop should stop
    pub shutdown: bool,
}

/// Loop-local context threaded through every tick
pub struct Bot<T: Transport> {
    config: Config,
    transport: T,
    store: ScheduleStore,
    cursor: UpdateCursor,
    active_target: Option<ChatId>,
    /// Last minute the matcher has covered
    last_matched: Option<NaiveDateTime>,
    version: String,
    version_notice: Option<String>,
    started: Instant,
}

impl<T: Transport> Bot<T> {
    pub fn new(config: Config, transport: T) -> Result<Self> {
        let store = ScheduleStore::new(&config);
        let cursor = UpdateCursor::load(&config.cursor_file)?;
        let version = bot_version(&config);
        let version_notice = pending_version_notice(&config, &version);

        Ok(Self {
            config,
            transport,
            store,
            cursor,
            active_target: None,
            last_matched: None,
            version,
            version_notice,
            started: Instant::now(),
        })
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    pub fn cursor(&self) -> &UpdateCursor {
        &self.cursor
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Most recent sender
    pub fn active_target(&self) -> Option<ChatId> {
        self.active_target
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Run until the watchdog fires
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Run until the watchdog fires or `shutdown` resolves. Stops only between ticks.
    pub async fn run_until<F: Future<Output = ()>>(mut self, shutdown: F) -> Result<()> {
        tokio::pin!(shutdown);
        info!(
            version = %self.version,
            cursor = self.cursor.last(),
            timezone = %self.config.timezone,
            "Poll loop starting"
        );

        let timezone = self.config.timezone;
        loop {
            let pause = match self.tick_with_clock(|| local_now(timezone)).await {
                Ok(report) if report.shutdown => return Ok(()),
                Ok(report) => {
                    if report.dispatched > 0 || report.fired > 0 {
                        debug!(?report, "Tick done");
                    }
                    self.config.effective_poll_interval()
                }
                Err(e) => {
                    error!("Tick failed: {}", e);
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping poll loop");
                    return Ok(());
                }
            }
        }
    }

    /// One full iteration at local time `now`
    pub async fn tick(&mut self, now: NaiveDateTime) -> Result<TickReport> {
        self.tick_with_clock(|| now).await
    }

    /// One full iteration, reading the local time from `clock`. The matcher
    /// uses the time after pull and dispatch, since both may wait on the network.
    pub async fn tick_with_clock<C>(&mut self, clock: C) -> Result<TickReport>
    where
        C: Fn() -> NaiveDateTime,
    {
        let dispatched = self.pull_and_dispatch(clock()).await?;

        let now = truncate_to_minute(clock());
        let mut fired = 0;
        for minute in minutes_to_match(self.last_matched, now) {
            fired += matcher::notify_due(
                &self.store,
                &self.transport,
                minute,
                self.active_target,
                &self.config.bot_name,
            )
            .await?;
        }
        if self.last_matched.map_or(true, |last| last < now) {
            self.last_matched = Some(now);
        }

        let pruned = self.store.prune_fired_one_shot()?;
        let rearmed = self.store.rearm_recurring(now)?;
        if pruned > 0 || rearmed > 0 {
            debug!(pruned, rearmed, "Maintenance pass");
        }

        let shutdown = self.watchdog_expired();
        if shutdown {
            self.shutdown_notice().await;
        }

        Ok(TickReport {
            dispatched,
            fired,
            pruned,
            rearmed,
            shutdown,
        })
    }

    /// Pull updates newer than the cursor and dispatch them in id order.
    /// A failed pull counts as "no updates" and leaves the cursor alone.
    async fn pull_and_dispatch(&mut self, now: NaiveDateTime) -> Result<usize> {
        let mut updates = match self.transport.pull_updates(self.cursor.offset()).await {
            Ok(updates) => updates,
            Err(e) if e.is_transport() => {
                warn!(offset = self.cursor.offset(), "Failed to pull updates: {}", e);
                return Ok(0);
            }
            Err(e) => return Err(e),
        };
        updates.sort_by_key(|u| u.update_id);

        let mut dispatched = 0;
        for update in updates {
            if update.update_id < self.cursor.offset() {
                debug!(update_id = update.update_id, "Skipping already consumed update");
                continue;
            }

            if let Some((chat_id, text)) = update.text_message() {
                self.active_target = Some(chat_id);
                info!(
                    update_id = update.update_id,
                    chat_id,
                    "New message: {}",
                    text.chars().take(50).collect::<String>()
                );

                let ctx = DispatchContext {
                    bot_name: &self.config.bot_name,
                    version: &self.version,
                    version_notice: self.version_notice.as_deref(),
                };
                let outcome = dispatcher::dispatch(&self.store, &ctx, chat_id, text, now);

                for reply in &outcome.replies {
                    if let Err(e) = self.transport.send(reply).await {
                        warn!(chat_id = reply.chat_id, "Failed to send reply: {}", e);
                    }
                }

                if outcome.command == Command::Start && self.version_notice.is_some() {
                    self.record_version_announced();
                }
                dispatched += 1;
            }

            self.cursor.advance(update.update_id)?;
        }

        Ok(dispatched)
    }

    fn watchdog_expired(&self) -> bool {
        self.config
            .max_runtime
            .is_some_and(|max| self.started.elapsed() >= max)
    }

    async fn shutdown_notice(&self) {
        info!(
            elapsed_secs = self.started.elapsed().as_secs(),
            "Maximum runtime reached, shutting down"
        );
        let Some(chat_id) = self.active_target else {
            return;
        };
        let notice = OutboundMessage::new(
            chat_id,
            format!(
                "[ 🤖 ] {} : ⌛ Going offline, maximum runtime reached",
                self.config.bot_name
            ),
        );
        if let Err(e) = self.transport.send(&notice).await {
            warn!(chat_id, "Failed to send shutdown notice: {}", e);
        }
    }

    fn record_version_announced(&mut self) {
        match write_atomic(&self.config.announced_version_file, self.version.as_bytes()) {
            Ok(()) => self.version_notice = None,
            Err(e) => warn!("Failed to record announced version: {}", e),
        }
    }
}

/// Current wall-clock time in the deployment zone
fn local_now(timezone: Tz) -> NaiveDateTime {
    Utc::now().with_timezone(&timezone).naive_local()
}

/// Minutes the matcher still owes: everything after `last_matched` up to `now`,
/// at most `MAX_CATCH_UP_MINUTES` back. Just `now` when nothing was matched yet.
fn minutes_to_match(
    last_matched: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> Vec<NaiveDateTime> {
    let earliest = now - Duration::minutes(MAX_CATCH_UP_MINUTES);
    let mut minute = match last_matched {
        Some(last) if last < now => (last + Duration::minutes(1)).max(earliest),
        _ => now,
    };

    let mut minutes = Vec::new();
    while minute <= now {
        minutes.push(minute);
        minute += Duration::minutes(1);
    }
    minutes
}

/// Version from the version file, else the package version
pub fn bot_version(config: &Config) -> String {
    fs::read_to_string(&config.version_file)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
}

/// Notice to show on the next `/start` if `version` was never announced
fn pending_version_notice(config: &Config, version: &str) -> Option<String> {
    let announced = fs::read_to_string(&config.announced_version_file).ok();
    match announced.as_deref().map(str::trim) {
        Some(previous) if previous == version => None,
        _ => Some(format!("Updated to v{}", version)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::transport::Update;
    use chrono::NaiveDate;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Feed that hands out scripted batches, then nothing
    #[derive(Default)]
    struct ScriptedTransport {
        batches: Mutex<VecDeque<Result<Vec<Update>>>>,
        offsets: Mutex<Vec<i64>>,
        sent: Mutex<Vec<OutboundMessage>>,
    }

    impl ScriptedTransport {
        fn push(&self, batch: Result<Vec<Update>>) {
            self.batches.lock().unwrap().push_back(batch);
        }
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn pull_updates(&self, offset: i64) -> Result<Vec<Update>> {
            self.offsets.lock().unwrap().push(offset);
            self.batches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn send(&self, message: &OutboundMessage) -> Result<()> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_transport_error_keeps_cursor() {
        let temp_dir = TempDir::new().unwrap();
        let mut bot = Bot::new(Config::for_test(temp_dir.path()), ScriptedTransport::default()).unwrap();

        bot.transport.push(Err(Error::Transport("timeout".into())));
        let report = bot.tick(at(8, 0)).await.unwrap();
        assert_eq!(report.dispatched, 0);
        assert_eq!(bot.cursor().last(), 0);

        bot.transport.push(Ok(vec![Update::text(3, 1, "/list")]));
        bot.tick(at(8, 0)).await.unwrap();
        assert_eq!(bot.cursor().last(), 3);
        assert_eq!(*bot.transport.offsets.lock().unwrap(), vec![1, 1]);
    }

    #[tokio::test]
    async fn test_non_text_updates_advance_cursor() {
        let temp_dir = TempDir::new().unwrap();
        let mut bot = Bot::new(Config::for_test(temp_dir.path()), ScriptedTransport::default()).unwrap();

        bot.transport.push(Ok(vec![Update {
            update_id: 10,
            message: None,
        }]));
        let report = bot.tick(at(8, 0)).await.unwrap();
        assert_eq!(report.dispatched, 0);
        assert_eq!(bot.cursor().offset(), 11);
        assert!(bot.active_target().is_none());
    }

    #[tokio::test]
    async fn test_redelivered_updates_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let mut bot = Bot::new(Config::for_test(temp_dir.path()), ScriptedTransport::default()).unwrap();

        bot.transport.push(Ok(vec![Update::text(5, 1, "/add 09:00 once")]));
        bot.tick(at(8, 0)).await.unwrap();
        bot.transport.push(Ok(vec![
            Update::text(5, 1, "/add 09:00 once"),
            Update::text(6, 1, "/list"),
        ]));
        let report = bot.tick(at(8, 0)).await.unwrap();

        assert_eq!(report.dispatched, 1);
        assert_eq!(bot.store().load().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_watchdog_sends_final_notice() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::for_test(temp_dir.path());
        config.max_runtime = Some(Duration::ZERO);
        let mut bot = Bot::new(config, ScriptedTransport::default()).unwrap();

        bot.transport.push(Ok(vec![Update::text(1, 42, "/list")]));
        let report = bot.tick(at(8, 0)).await.unwrap();
        assert!(report.shutdown);

        let sent = bot.transport.sent.lock().unwrap();
        assert_eq!(sent.last().unwrap().chat_id, 42);
        assert!(sent.last().unwrap().text.contains("Going offline"));
    }

    #[tokio::test]
    async fn test_version_notice_shown_once() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::for_test(temp_dir.path());
        fs::write(&config.version_file, "2.0.0\n").unwrap();
        fs::write(&config.announced_version_file, "1.9.0").unwrap();
        let mut bot = Bot::new(config.clone(), ScriptedTransport::default()).unwrap();
        assert_eq!(bot.version(), "2.0.0");

        bot.transport.push(Ok(vec![Update::text(1, 7, "/start"), Update::text(2, 7, "/start")]));
        bot.tick(at(8, 0)).await.unwrap();

        let sent = bot.transport.sent.lock().unwrap();
        let notices = sent.iter().filter(|m| m.text.contains("Updated to v2.0.0")).count();
        assert_eq!(notices, 1);
        assert_eq!(fs::read_to_string(&config.announced_version_file).unwrap(), "2.0.0");
    }

    #[tokio::test]
    async fn test_run_until_stops_on_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let bot = Bot::new(Config::for_test(temp_dir.path()), ScriptedTransport::default()).unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            bot.run_until(tokio::time::sleep(Duration::from_millis(50))),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_skipped_minute_is_caught_up() {
        let temp_dir = TempDir::new().unwrap();
        let mut bot = Bot::new(Config::for_test(temp_dir.path()), ScriptedTransport::default()).unwrap();

        bot.transport.push(Ok(vec![Update::text(1, 7, "/add 09:01 standup")]));
        bot.tick(at(9, 0)).await.unwrap();

        // A slow tick jumped straight from 09:00 to 09:02
        let report = bot.tick(at(9, 2)).await.unwrap();
        assert_eq!(report.fired, 1);
        let sent = bot.transport.sent.lock().unwrap();
        assert!(sent.last().unwrap().text.contains("Reminder: standup"));
    }

    #[tokio::test]
    async fn test_catch_up_window_is_bounded() {
        let temp_dir = TempDir::new().unwrap();
        let mut bot = Bot::new(Config::for_test(temp_dir.path()), ScriptedTransport::default()).unwrap();

        bot.transport.push(Ok(vec![Update::text(1, 7, "/add 08:30 long gone")]));
        bot.tick(at(8, 0)).await.unwrap();

        let report = bot.tick(at(9, 1)).await.unwrap();
        assert_eq!(report.fired, 0);
    }

    #[tokio::test]
    async fn test_fresh_process_does_not_fire_retroactively() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::for_test(temp_dir.path());
        ScheduleStore::new(&config)
            .add(7, "09:00".parse().unwrap(), "missed")
            .unwrap();

        let mut bot = Bot::new(config, ScriptedTransport::default()).unwrap();
        let report = bot.tick(at(9, 1)).await.unwrap();
        assert_eq!(report.fired, 0);
    }

    #[tokio::test]
    async fn test_matcher_uses_time_after_dispatch() {
        let temp_dir = TempDir::new().unwrap();
        let mut bot = Bot::new(Config::for_test(temp_dir.path()), ScriptedTransport::default()).unwrap();
        bot.transport.push(Ok(vec![Update::text(1, 7, "/add 09:00 on the hour")]));

        // First read happens before the pull, the second after dispatch
        let readings = Mutex::new(VecDeque::from([
            at(8, 59) + chrono::Duration::seconds(50),
            at(9, 0) + chrono::Duration::seconds(10),
        ]));
        let report = bot
            .tick_with_clock(|| readings.lock().unwrap().pop_front().unwrap_or(at(9, 0)))
            .await
            .unwrap();

        assert_eq!(report.dispatched, 1);
        assert_eq!(report.fired, 1);
    }

    /// Feed that only counts pulls, shared with the test after the bot is moved
    struct CountingTransport {
        pulls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Transport for CountingTransport {
        async fn pull_updates(&self, _offset: i64) -> Result<Vec<Update>> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn send(&self, _message: &OutboundMessage) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failing_ticks_back_off_and_keep_running() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::for_test(temp_dir.path());
        // A directory where the schedule file should be makes every tick fail
        config.schedule_file = temp_dir.path().join("schedule-dir");
        fs::create_dir(&config.schedule_file).unwrap();

        let pulls = Arc::new(AtomicUsize::new(0));
        let transport = CountingTransport {
            pulls: Arc::clone(&pulls),
        };
        let mut bot = Bot::new(config, transport).unwrap();
        assert!(bot.tick(at(8, 0)).await.is_err());
        let after_first = pulls.load(Ordering::SeqCst);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            bot.run_until(tokio::time::sleep(Duration::from_millis(200))),
        )
        .await;

        assert!(matches!(result, Ok(Ok(()))));
        assert!(pulls.load(Ordering::SeqCst) >= after_first + 3);
    }

    #[test]
    fn test_minutes_to_match() {
        assert_eq!(minutes_to_match(None, at(9, 0)), vec![at(9, 0)]);
        assert_eq!(minutes_to_match(Some(at(9, 0)), at(9, 0)), vec![at(9, 0)]);
        assert_eq!(
            minutes_to_match(Some(at(9, 0)), at(9, 2)),
            vec![at(9, 1), at(9, 2)]
        );
        // Clock stepped backwards
        assert_eq!(minutes_to_match(Some(at(9, 5)), at(9, 2)), vec![at(9, 2)]);

        let long_gap = minutes_to_match(Some(at(8, 0)), at(9, 0));
        assert_eq!(long_gap.len(), MAX_CATCH_UP_MINUTES as usize + 1);
        assert_eq!(long_gap[0], at(8, 55));
    }

    #[test]
    fn test_bot_version_fallback() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::for_test(temp_dir.path());
        assert_eq!(bot_version(&config), env!("CARGO_PKG_VERSION"));
    }
}
