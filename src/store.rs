//! Schedule store - persistent JSON document of reminders
//!
//! Every operation is a full load, mutate, save cycle against the backing file,
//! so nothing cached in memory can drift from what is on disk between ticks.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::trigger::Trigger;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Conversation a reminder belongs to (bot API chat id)
pub type ChatId = i64;

/// One scheduled notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    /// Stable record id, assigned on insert
    #[serde(default)]
    pub id: u64,
    /// None for documents written by single-target deployments
    #[serde(default, alias = "chat_id", skip_serializing_if = "Option::is_none")]
    pub target: Option<ChatId>,
    #[serde(rename = "time")]
    pub trigger: Trigger,
    pub message: String,
    #[serde(rename = "notified", default)]
    pub fired: bool,
}

impl Reminder {
    /// Whether `target` may see and manage this reminder
    pub fn belongs_to(&self, target: ChatId) -> bool {
        self.target.map_or(true, |t| t == target)
    }
}

/// File-backed reminder list
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    path: PathBuf,
}

impl ScheduleStore {
    pub fn new(config: &Config) -> Self {
        Self::at(&config.schedule_file)
    }

    pub fn at(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all reminders, healing a missing, empty or unparsable document to empty.
    /// Individual unreadable entries are dropped; the rest survive.
    pub fn load(&self) -> Result<Vec<Reminder>> {
        match self.read_document() {
            Ok(Some((mut reminders, dropped))) => {
                let assigned = assign_missing_ids(&mut reminders);
                if assigned {
                    debug!(path = %self.path.display(), "Assigned ids to legacy reminders");
                }
                if assigned || dropped > 0 {
                    self.save(&reminders)?;
                }
                Ok(reminders)
            }
            Ok(None) => {
                self.save(&[])?;
                Ok(Vec::new())
            }
            Err(Error::StoreCorruption(reason)) => {
                warn!(
                    path = %self.path.display(),
                    "Schedule store unreadable ({}), resetting to empty", reason
                );
                self.save(&[])?;
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Raw read: `None` when the document is missing or blank, otherwise the
    /// readable reminders and how many entries were dropped
    fn read_document(&self) -> Result<Option<(Vec<Reminder>, usize)>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Err(Error::StoreCorruption(e.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }

        let entries: Vec<Value> =
            serde_json::from_str(&content).map_err(|e| Error::StoreCorruption(e.to_string()))?;

        let mut reminders = Vec::with_capacity(entries.len());
        let mut dropped = 0;
        for (position, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<Reminder>(entry.clone()) {
                Ok(reminder) => reminders.push(reminder),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        position,
                        entry = %entry,
                        "Dropping unreadable reminder: {}", e
                    );
                    dropped += 1;
                }
            }
        }
        Ok(Some((reminders, dropped)))
    }

    /// Save the full document atomically
    pub fn save(&self, reminders: &[Reminder]) -> Result<()> {
        let json = serde_json::to_string_pretty(reminders)?;
        write_atomic(&self.path, json.as_bytes())
    }

    /// Reminders visible to `target`, in insertion order
    pub fn list(&self, target: ChatId) -> Result<Vec<Reminder>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|r| r.belongs_to(target))
            .collect())
    }

    /// Append a new pending reminder
    pub fn add(&self, target: ChatId, trigger: Trigger, message: &str) -> Result<Reminder> {
        let message = message.trim();
        if message.is_empty() {
            return Err(Error::Validation("missing reminder message".to_string()));
        }

        let mut reminders = self.load()?;
        let reminder = Reminder {
            id: next_id(&reminders),
            target: Some(target),
            trigger,
            message: message.to_string(),
            fired: false,
        };
        reminders.push(reminder.clone());
        self.save(&reminders)?;
        Ok(reminder)
    }

    /// Map a 1-based position in `target`'s list to the record id
    pub fn resolve(&self, target: ChatId, index: usize) -> Result<u64> {
        resolve_index(&self.load()?, target, index)
    }

    /// Remove the `index`-th (1-based) reminder of `target`'s list
    pub fn remove(&self, target: ChatId, index: usize) -> Result<Reminder> {
        let mut reminders = self.load()?;
        let id = resolve_index(&reminders, target, index)?;
        let removed = take_by_id(&mut reminders, id).ok_or(Error::NotFound(index))?;
        self.save(&reminders)?;
        Ok(removed)
    }

    /// Remove a reminder by record id
    pub fn remove_by_id(&self, id: u64) -> Result<Option<Reminder>> {
        let mut reminders = self.load()?;
        let removed = take_by_id(&mut reminders, id);
        if removed.is_some() {
            self.save(&reminders)?;
        }
        Ok(removed)
    }

    /// Remove everything `target` can see. Returns the number removed.
    pub fn clear(&self, target: ChatId) -> Result<usize> {
        let mut reminders = self.load()?;
        let before = reminders.len();
        reminders.retain(|r| !r.belongs_to(target));
        let removed = before - reminders.len();
        self.save(&reminders)?;
        Ok(removed)
    }

    /// Pending reminders whose trigger matches `now`
    pub fn due(&self, now: NaiveDateTime) -> Result<Vec<Reminder>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|r| !r.fired && r.trigger.matches(now))
            .collect())
    }

    /// Set the fired flag and persist. Returns false if the reminder is gone.
    pub fn mark_fired(&self, id: u64) -> Result<bool> {
        let mut reminders = self.load()?;
        let Some(reminder) = reminders.iter_mut().find(|r| r.id == id) else {
            return Ok(false);
        };
        if !reminder.fired {
            reminder.fired = true;
            self.save(&reminders)?;
        }
        Ok(true)
    }

    /// Delete fired one-shot reminders. Recurring ones are kept.
    pub fn prune_fired_one_shot(&self) -> Result<usize> {
        let mut reminders = self.load()?;
        let before = reminders.len();
        reminders.retain(|r| !(r.fired && !r.trigger.is_recurring()));
        let removed = before - reminders.len();
        if removed > 0 {
            self.save(&reminders)?;
        }
        Ok(removed)
    }

    /// Re-arm fired daily reminders once their minute has passed
    pub fn rearm_recurring(&self, now: NaiveDateTime) -> Result<usize> {
        let mut reminders = self.load()?;
        let mut rearmed = 0;
        for reminder in reminders.iter_mut() {
            if reminder.fired && reminder.trigger.is_recurring() && !reminder.trigger.matches(now) {
                reminder.fired = false;
                rearmed += 1;
            }
        }
        if rearmed > 0 {
            self.save(&reminders)?;
        }
        Ok(rearmed)
    }
}

/// Write to a temp file in the same directory and rename it into place
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;

    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

fn next_id(reminders: &[Reminder]) -> u64 {
    reminders.iter().map(|r| r.id).max().unwrap_or(0) + 1
}

fn assign_missing_ids(reminders: &mut [Reminder]) -> bool {
    let mut next = next_id(reminders);
    let mut changed = false;
    for reminder in reminders.iter_mut().filter(|r| r.id == 0) {
        reminder.id = next;
        next += 1;
        changed = true;
    }
    changed
}

fn resolve_index(reminders: &[Reminder], target: ChatId, index: usize) -> Result<u64> {
    if index == 0 {
        return Err(Error::NotFound(index));
    }
    reminders
        .iter()
        .filter(|r| r.belongs_to(target))
        .nth(index - 1)
        .map(|r| r.id)
        .ok_or(Error::NotFound(index))
}

fn take_by_id(reminders: &mut Vec<Reminder>, id: u64) -> Option<Reminder> {
    let pos = reminders.iter().position(|r| r.id == id)?;
    Some(reminders.remove(pos))
}
