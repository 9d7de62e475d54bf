//! File-backed contacts registry and allow-list.
//!
//! The contacts file is a JSON array of [`Contact`] entries. Its modification
//! time is checked at most once per refresh interval and the file re-read when
//! it changed, so edits apply without a restart.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant, SystemTime};

use tracing::{info, warn};

use chatrelay_core::{Contact, ContactRegistry};

pub const TRANSPORT_SCHEME: &str = "whatsapp:";

const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Loaded {
    contacts: HashMap<String, Contact>,
    modified: Option<SystemTime>,
    checked: Option<Instant>,
}

#[derive(Debug)]
pub struct ContactBook {
    path: Option<PathBuf>,
    allow_from: HashSet<String>,
    strip_scheme: bool,
    refresh_interval: Duration,
    loaded: RwLock<Loaded>,
}

impl ContactBook {
    /// Registry backed by `path` (if any) plus the configured `allow_from` ids.
    pub fn load(path: Option<&Path>, allow_from: &[String], strip_scheme: bool) -> anyhow::Result<Self> {
        let book = Self {
            path: path.map(Path::to_path_buf),
            allow_from: HashSet::new(),
            strip_scheme,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            loaded: RwLock::new(Loaded::default()),
        }
        .with_allow_from(allow_from);

        if let Some(path) = &book.path {
            let loaded = book.read_file(path)?;
            info!(
                "Loaded {} contacts from {}",
                loaded.contacts.len(),
                path.display()
            );
            *book.loaded.write().unwrap_or_else(PoisonError::into_inner) = loaded;
        }
        Ok(book)
    }

    /// In-memory registry, mostly for tests and the local chat.
    #[must_use]
    pub fn from_contacts(contacts: Vec<Contact>, allow_from: &[String], strip_scheme: bool) -> Self {
        let book = Self {
            path: None,
            allow_from: HashSet::new(),
            strip_scheme,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            loaded: RwLock::new(Loaded::default()),
        }
        .with_allow_from(allow_from);
        let contacts = book.index(contacts);
        book.loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .contacts = contacts;
        book
    }

    /// How often lookups may stat the contacts file.
    #[must_use]
    pub const fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    fn with_allow_from(mut self, allow_from: &[String]) -> Self {
        self.allow_from = allow_from.iter().map(|id| self.normalize(id)).collect();
        self
    }

    /// Sender id as used for comparisons.
    #[must_use]
    pub fn normalize(&self, sender_id: &str) -> String {
        let id = sender_id.trim();
        if self.strip_scheme {
            id.strip_prefix(TRANSPORT_SCHEME).unwrap_or(id).to_string()
        } else {
            id.to_string()
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().contacts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn index(&self, contacts: Vec<Contact>) -> HashMap<String, Contact> {
        contacts
            .into_iter()
            .map(|mut c| {
                c.phone_number = self.normalize(&c.phone_number);
                (c.phone_number.clone(), c)
            })
            .collect()
    }

    fn read_file(&self, path: &Path) -> anyhow::Result<Loaded> {
        let modified = std::fs::metadata(path)?.modified().ok();
        let content = std::fs::read_to_string(path)?;
        let contacts: Vec<Contact> = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid contacts file {}: {e}", path.display()))?;
        Ok(Loaded {
            contacts: self.index(contacts),
            modified,
            checked: Some(Instant::now()),
        })
    }

    /// Re-read the file when it changed since the last load, checking at most
    /// once per refresh interval. A broken file keeps the previous contacts.
    fn refresh(&self) {
        let Some(path) = &self.path else {
            return;
        };
        {
            let mut loaded = self.loaded.write().unwrap_or_else(PoisonError::into_inner);
            if loaded
                .checked
                .is_some_and(|at| at.elapsed() < self.refresh_interval)
            {
                return;
            }
            loaded.checked = Some(Instant::now());
        }
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        if modified.is_none() || modified == self.read().modified {
            return;
        }
        match self.read_file(path) {
            Ok(loaded) => {
                info!("Reloaded {} contacts from {}", loaded.contacts.len(), path.display());
                *self.loaded.write().unwrap_or_else(PoisonError::into_inner) = loaded;
            }
            Err(e) => warn!("Keeping previous contacts: {e}"),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Loaded> {
        self.loaded.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ContactRegistry for ContactBook {
    fn lookup(&self, sender_id: &str) -> Option<Contact> {
        self.refresh();
        self.read().contacts.get(&self.normalize(sender_id)).cloned()
    }

    /// Everyone is allowed when there are neither contacts nor `allow_from`
    /// entries; otherwise the id must appear in one of them.
    fn is_allowed(&self, sender_id: &str) -> bool {
        self.refresh();
        let id = self.normalize(sender_id);
        let loaded = self.read();
        if loaded.contacts.is_empty() && self.allow_from.is_empty() {
            return true;
        }
        self.allow_from.contains(&id) || loaded.contacts.contains_key(&id)
    }
}
