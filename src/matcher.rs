//! Notification matcher
//!
//! Fires each pending reminder whose trigger equals the current local minute,
//! then durably marks it fired so a second pass in the same minute is a no-op.

use crate::error::Result;
use crate::store::{ChatId, Reminder, ScheduleStore};
use crate::transport::{OutboundMessage, Transport};
use chrono::NaiveDateTime;
use tracing::{info, warn};

/// Notification text for a fired reminder
pub fn format_notification(bot_name: &str, reminder: &Reminder) -> String {
    format!("[ 🤖 ] {}\n🔔 Reminder: {}", bot_name, reminder.message)
}

/// Send every reminder due at `now` and mark it fired. Returns how many fired.
///
/// Untargeted reminders go to `fallback` (the active target); with no fallback
/// they stay pending.
pub async fn notify_due<T: Transport + ?Sized>(
    store: &ScheduleStore,
    transport: &T,
    now: NaiveDateTime,
    fallback: Option<ChatId>,
    bot_name: &str,
) -> Result<usize> {
    let mut fired = 0;

    for reminder in store.due(now)? {
        let Some(chat_id) = reminder.target.or(fallback) else {
            warn!(reminder_id = reminder.id, "Due reminder has no target yet, skipping");
            continue;
        };

        info!(
            reminder_id = reminder.id,
            chat_id,
            trigger = %reminder.trigger,
            "Firing reminder"
        );

        let message = OutboundMessage::new(chat_id, format_notification(bot_name, &reminder));
        if let Err(e) = transport.send(&message).await {
            warn!(reminder_id = reminder.id, chat_id, "Failed to deliver reminder: {}", e);
        }

        if store.mark_fired(reminder.id)? {
            fired += 1;
        }
    }

    Ok(fired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::Error;
    use crate::transport::Update;
    use crate::trigger::Trigger;
    use chrono::{NaiveDate, NaiveTime};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<OutboundMessage>>,
        fail_sends: bool,
    }

    #[async_trait::async_trait]
    impl Transport for RecordingTransport {
        async fn pull_updates(&self, _offset: i64) -> Result<Vec<Update>> {
            Ok(Vec::new())
        }

        async fn send(&self, message: &OutboundMessage) -> Result<()> {
            self.sent.lock().unwrap().push(message.clone());
            if self.fail_sends {
                return Err(Error::Transport("down".into()));
            }
            Ok(())
        }
    }

    fn daily(h: u32, m: u32) -> Trigger {
        Trigger::Daily(NaiveTime::from_hms_opt(h, m, 0).unwrap())
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[tokio::test]
    async fn test_fires_only_matching_minute_once() {
        let temp_dir = TempDir::new().unwrap();
        let store = ScheduleStore::new(&Config::for_test(temp_dir.path()));
        let transport = RecordingTransport::default();

        store.add(1, daily(9, 0), "first").unwrap();
        store.add(1, daily(9, 5), "second").unwrap();

        let fired = notify_due(&store, &transport, at(9, 0, 1), None, "Bot").await.unwrap();
        assert_eq!(fired, 1);

        let fired = notify_due(&store, &transport, at(9, 0, 59), None, "Bot").await.unwrap();
        assert_eq!(fired, 0);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, 1);
        assert!(sent[0].text.contains("Reminder: first"));
        assert!(sent[0].text.starts_with("[ 🤖 ] Bot"));
    }

    #[tokio::test]
    async fn test_delivery_failure_still_marks_fired() {
        let temp_dir = TempDir::new().unwrap();
        let store = ScheduleStore::new(&Config::for_test(temp_dir.path()));
        let transport = RecordingTransport {
            fail_sends: true,
            ..Default::default()
        };

        store.add(1, daily(9, 0), "first").unwrap();
        let fired = notify_due(&store, &transport, at(9, 0, 0), None, "Bot").await.unwrap();
        assert_eq!(fired, 1);
        assert!(store.load().unwrap()[0].fired);
    }

    #[tokio::test]
    async fn test_untargeted_uses_fallback() {
        let temp_dir = TempDir::new().unwrap();
        let store = ScheduleStore::new(&Config::for_test(temp_dir.path()));
        let transport = RecordingTransport::default();

        std::fs::write(store.path(), r#"[{"time": "09:00", "message": "legacy"}]"#).unwrap();

        // No active target yet: stays pending
        let fired = notify_due(&store, &transport, at(9, 0, 0), None, "Bot").await.unwrap();
        assert_eq!(fired, 0);
        assert!(!store.load().unwrap()[0].fired);

        let fired = notify_due(&store, &transport, at(9, 0, 30), Some(77), "Bot").await.unwrap();
        assert_eq!(fired, 1);
        assert_eq!(transport.sent.lock().unwrap()[0].chat_id, 77);
    }
}
