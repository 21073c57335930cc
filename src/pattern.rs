//! One-shot watchers that release a waiter when some text shows up.

use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

/// Where a [`PatternWatcher`] stands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// Still waiting for the pattern.
    Pending,
    /// The pattern was seen.
    Matched,
    /// The output ended without the pattern.
    Abandoned,
}

/// Waits for a substring to appear in a process's output.
///
/// Watchers are created by [`ConsoleBuffer::watch`](crate::console::ConsoleBuffer::watch)
/// and fed one line at a time. Once resolved, a watcher stays resolved.
#[derive(Debug)]
pub struct PatternWatcher {
    pattern: String,
    outcome: Mutex<Outcome>,
    resolved: Condvar,
}

impl PatternWatcher {
    pub(crate) fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            outcome: Mutex::new(Outcome::Pending),
            resolved: Condvar::new(),
        }
    }

    /// The text being waited for.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The current outcome, without waiting.
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        *self.lock()
    }

    /// Checks one line. Returns true if the watcher is resolved afterwards.
    pub(crate) fn offer(&self, line: &str) -> bool {
        let mut outcome = self.lock();
        if *outcome != Outcome::Pending {
            return true;
        }

        if line.contains(self.pattern.as_str()) {
            trace!("pattern {:?} matched line {:?}", self.pattern, line);
            *outcome = Outcome::Matched;
            self.resolved.notify_all();
            true
        } else {
            false
        }
    }

    /// Gives up: no more output will ever be offered.
    pub(crate) fn abandon(&self) {
        let mut outcome = self.lock();
        if *outcome == Outcome::Pending {
            *outcome = Outcome::Abandoned;
            self.resolved.notify_all();
        }
    }

    /// Blocks until the watcher resolves. Returns true if the pattern was seen.
    pub fn wait(&self) -> bool {
        let mut outcome = self.lock();
        while *outcome == Outcome::Pending {
            outcome = self
                .resolved
                .wait(outcome)
                .unwrap_or_else(PoisonError::into_inner);
        }

        *outcome == Outcome::Matched
    }

    /// Blocks until the watcher resolves, or until `timeout` has elapsed.
    ///
    /// Returns [`Outcome::Pending`] only on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Outcome {
        let deadline = Instant::now() + timeout;
        let mut outcome = self.lock();
        while *outcome == Outcome::Pending {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            outcome = self
                .resolved
                .wait_timeout(outcome, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        *outcome
    }

    fn lock(&self) -> MutexGuard<'_, Outcome> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::{Outcome, PatternWatcher};

    #[test]
    fn fires_on_substring() {
        let watcher = PatternWatcher::new("ready");
        assert!(!watcher.offer("starting up"));
        assert_eq!(watcher.outcome(), Outcome::Pending);
        assert!(watcher.offer("server is ready for connections"));
        assert_eq!(watcher.outcome(), Outcome::Matched);
    }

    #[test]
    fn fires_once() {
        let watcher = PatternWatcher::new("ready");
        assert!(watcher.offer("ready"));
        watcher.abandon();
        assert_eq!(watcher.outcome(), Outcome::Matched);
    }

    #[test]
    fn abandoned_watcher_ignores_later_lines() {
        let watcher = PatternWatcher::new("ready");
        watcher.abandon();
        assert!(watcher.offer("ready"));
        assert_eq!(watcher.outcome(), Outcome::Abandoned);
    }

    #[test]
    fn wait_times_out_while_pending() {
        let watcher = PatternWatcher::new("ready");
        assert_eq!(
            watcher.wait_timeout(Duration::from_millis(20)),
            Outcome::Pending
        );
    }

    #[test]
    fn wait_reports_abandonment() {
        let watcher = Arc::new(PatternWatcher::new("ready"));
        let closer = {
            let watcher = watcher.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                watcher.abandon();
            })
        };

        assert!(!watcher.wait());
        closer.join().expect("closer panicked");
    }

    #[test]
    fn wait_is_released_from_another_thread() {
        let watcher = Arc::new(PatternWatcher::new("ready"));
        let feeder = {
            let watcher = watcher.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                watcher.offer("ready");
            })
        };

        assert!(watcher.wait());
        assert_eq!(watcher.outcome(), Outcome::Matched);
        feeder.join().expect("feeder panicked");
    }
}
