//! Timer service: a `slab`-backed arena of deadlines the main loop polls
//! via `tokio::time::sleep_until` against the nearest one (§4.B, §4.D
//! "timers are owned by the plugin that created them and are released when
//! that plugin unloads").

use std::time::{Duration, Instant};

use dsme_core::{PluginId, TimerId};
use slab::Slab;

use super::MainLoopError;

struct TimerEntry {
    deadline: Instant,
    interval: Option<Duration>,
    owner: PluginId,
}

/// Opaque handle returned to callers; just `TimerId` with a service
/// reference attached so plugin code doesn't need to pass the service
/// around to cancel its own timer.
#[derive(Debug, Clone, Copy)]
pub struct TimerHandle(pub TimerId);

pub struct TimerService {
    entries: Slab<TimerEntry>,
}

impl TimerService {
    pub fn new() -> Self {
        TimerService { entries: Slab::new() }
    }

    /// Arms a one-shot or repeating timer owned by `owner`.
    pub fn create(&mut self, delay: Duration, interval: Option<Duration>, owner: PluginId) -> TimerId {
        let deadline = Instant::now() + delay;
        let key = self.entries.insert(TimerEntry { deadline, interval, owner });
        TimerId::from(key)
    }

    pub fn cancel(&mut self, id: TimerId) -> Result<(), MainLoopError> {
        if self.entries.contains(id.index()) {
            self.entries.remove(id.index());
            Ok(())
        } else {
            Err(MainLoopError::UnknownTimer(id.index() as u64))
        }
    }

    /// Releases every timer owned by `owner`, called when a plugin unloads.
    pub fn release_owned_by(&mut self, owner: PluginId) -> usize {
        let keys: Vec<usize> = self
            .entries
            .iter()
            .filter(|(_, e)| e.owner == owner)
            .map(|(k, _)| k)
            .collect();
        let n = keys.len();
        for key in keys {
            self.entries.remove(key);
        }
        n
    }

    /// The nearest deadline across all live timers, or `None` if there are
    /// no timers armed — the main loop's `select!` awaits this (or
    /// `future::pending()` when `None`) alongside every other source.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|(_, e)| e.deadline).min()
    }

    /// Pops every timer whose deadline has elapsed as of `now`, without
    /// deciding yet whether it lives on. The caller runs each timer's
    /// callback and must report the outcome back through [`Self::rearm`]
    /// or [`Self::cancel`] — §4.C's contract ("callback return value ≠ 0
    /// re-arms a repeating timer; return 0 destroys it") is decided by the
    /// callback's own return value, not by the interval it was created
    /// with. Returns `(TimerId, owner)` pairs for the caller to dispatch to
    /// the right plugin callback.
    pub fn expired(&mut self, now: Instant) -> Vec<(TimerId, PluginId)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(k, e)| (TimerId::from(k), e.owner))
            .collect()
    }

    /// Called after a fired timer's callback returns a nonzero value:
    /// reschedules it `interval` (its own recorded period, or `now`'s
    /// instant again for a zero-interval idle source that asked to keep
    /// running) out from `now`. A no-op if the timer was already destroyed
    /// (for example by `destroy_timer` called from within its own callback).
    pub fn rearm(&mut self, id: TimerId, now: Instant) {
        if let Some(entry) = self.entries.get_mut(id.index()) {
            let interval = entry.interval.unwrap_or(Duration::ZERO);
            entry.deadline = now + interval;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsme_core::CORE_PLUGIN;

    #[test]
    fn callback_returning_zero_destroys_a_one_shot_timer() {
        let mut timers = TimerService::new();
        let id = timers.create(Duration::from_millis(0), None, CORE_PLUGIN);
        let now = Instant::now();
        let fired = timers.expired(now);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, id);
        // `expired` only collects due timers; the caller's callback ran and
        // returned 0, so it reports that back as a cancel.
        assert!(timers.cancel(id).is_ok());
        assert!(timers.is_empty());
    }

    #[test]
    fn callback_returning_nonzero_rearms_a_repeating_timer() {
        let mut timers = TimerService::new();
        let id = timers.create(Duration::from_millis(0), Some(Duration::from_secs(1)), CORE_PLUGIN);
        let now = Instant::now();
        let fired = timers.expired(now);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, id);
        // Callback returned nonzero: the caller rearms rather than cancels.
        timers.rearm(id, now);
        assert_eq!(timers.len(), 1);
        assert!(timers.next_deadline().unwrap() > now);
    }

    #[test]
    fn callback_returning_zero_destroys_a_repeating_timer() {
        let mut timers = TimerService::new();
        let id = timers.create(Duration::from_millis(0), Some(Duration::from_secs(1)), CORE_PLUGIN);
        let now = Instant::now();
        let fired = timers.expired(now);
        assert_eq!(fired.len(), 1);
        assert!(timers.cancel(id).is_ok());
        assert!(timers.is_empty());
    }

    #[test]
    fn expired_does_not_prejudge_rearm_or_destroy() {
        let mut timers = TimerService::new();
        let id = timers.create(Duration::from_millis(0), Some(Duration::from_secs(1)), CORE_PLUGIN);
        let now = Instant::now();
        timers.expired(now);
        // Neither rearmed nor cancelled yet: the entry is exactly as it was
        // created, still due, and `expired` reports it again if asked.
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.expired(now).len(), 1);
        let _ = id;
    }

    #[test]
    fn cancel_unknown_timer_errors() {
        let mut timers = TimerService::new();
        let bogus = TimerId::from(999);
        assert!(timers.cancel(bogus).is_err());
    }

    #[test]
    fn unloading_plugin_releases_its_timers_only() {
        let mut timers = TimerService::new();
        let plugin_a = dsme_core::PluginId::from(0);
        let plugin_b = dsme_core::PluginId::from(1);
        timers.create(Duration::from_secs(10), None, plugin_a);
        let b_timer = timers.create(Duration::from_secs(10), None, plugin_b);
        let released = timers.release_owned_by(plugin_a);
        assert_eq!(released, 1);
        assert_eq!(timers.len(), 1);
        assert!(timers.cancel(b_timer).is_ok());
    }
}
