//! Per-sender inactivity timers.
//!
//! A timer does not touch sessions. When it fires it sends a
//! [`SessionExpired`] event over a channel and pauses until the sender is
//! active again; the consumer decides what an expiry means.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionExpired {
    pub sender_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Not armed: never started, fired and waiting for activity, or
    /// cancelled for this sender.
    Idle,
    Running,
    /// The scheduler was shut down.
    Cancelled,
}

#[derive(Debug)]
struct TimerEntry {
    generation: u64,
    last_reset: Instant,
    task: JoinHandle<()>,
}

/// Only running timers have an entry; firing or cancelling removes it.
#[derive(Debug, Default)]
struct Timers {
    entries: HashMap<String, TimerEntry>,
    next_generation: u64,
    closed: bool,
}

#[derive(Debug, Clone)]
pub struct ExpiryScheduler {
    interval: Duration,
    timers: Arc<Mutex<Timers>>,
    events: mpsc::UnboundedSender<SessionExpired>,
}

impl ExpiryScheduler {
    /// Build a scheduler and the receiving end of its expiry events.
    #[must_use]
    pub fn new(interval: Duration) -> (Self, mpsc::UnboundedReceiver<SessionExpired>) {
        let (events, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            interval,
            timers: Arc::new(Mutex::new(Timers::default())),
            events,
        };
        (scheduler, rx)
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    fn lock(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start or restart the sender's timer so it fires `interval` from now.
    /// Any pending earlier firing is discarded.
    pub fn touch(&self, sender_id: &str) {
        let mut timers = self.lock();
        if timers.closed {
            debug!("Scheduler is shut down, not arming timer for {sender_id}");
            return;
        }

        // Generations are unique across the whole map, so a stale task can
        // never match an entry created after its own was removed.
        timers.next_generation = timers.next_generation.wrapping_add(1);
        let generation = timers.next_generation;
        let last_reset = Instant::now();
        let deadline = last_reset + self.interval;

        let timers_ref = Arc::clone(&self.timers);
        let events = self.events.clone();
        let id = sender_id.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let mut timers = timers_ref.lock().unwrap_or_else(PoisonError::into_inner);
            if timers.entries.get(&id).map(|e| e.generation) != Some(generation) {
                return;
            }
            timers.entries.remove(&id);
            drop(timers);
            info!("Session timer expired for {id}");
            if events.send(SessionExpired { sender_id: id }).is_err() {
                debug!("Expiry receiver dropped");
            }
        });

        let previous = timers.entries.insert(
            sender_id.to_string(),
            TimerEntry {
                generation,
                last_reset,
                task,
            },
        );
        if let Some(previous) = previous {
            previous.task.abort();
        }
    }

    #[must_use]
    pub fn state(&self, sender_id: &str) -> TimerState {
        let timers = self.lock();
        if timers.closed {
            TimerState::Cancelled
        } else if timers.entries.contains_key(sender_id) {
            TimerState::Running
        } else {
            TimerState::Idle
        }
    }

    /// When the sender's timer will fire, if it is running.
    #[must_use]
    pub fn deadline(&self, sender_id: &str) -> Option<Instant> {
        self.lock()
            .entries
            .get(sender_id)
            .map(|e| e.last_reset + self.interval)
    }

    /// Number of running timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the sender's timer without firing.
    pub fn cancel(&self, sender_id: &str) {
        if let Some(entry) = self.lock().entries.remove(sender_id) {
            entry.task.abort();
            debug!("Cancelled timer for {sender_id}");
        }
    }

    /// Cancel every timer and refuse to arm new ones.
    pub fn shutdown(&self) {
        let mut timers = self.lock();
        timers.closed = true;
        let cancelled = timers.entries.len();
        for (_, entry) in timers.entries.drain() {
            entry.task.abort();
        }
        info!("Expiry scheduler shut down, {cancelled} pending timer(s) cancelled");
    }
}
