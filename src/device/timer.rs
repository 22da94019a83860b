// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Cancellable one-shot idle timer.
//!
//! Each arming spawns a thread that sleeps on a condition variable for the
//! configured delay and then runs the expiry callback, unless it was
//! cancelled first. [`IdleTimer::cancel`] is synchronous: it returns only
//! after every outstanding timer thread has exited, including one that is
//! in the middle of running its callback.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use crate::error::Result;

#[derive(Default)]
struct CancelSignal {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl CancelSignal {
    fn cancel(&self) {
        *lock(&self.cancelled) = true;
        self.wake.notify_all();
    }

    /// Sleeps for `delay`. Returns `true` if the delay elapsed without a cancel.
    fn wait(&self, delay: Duration) -> bool {
        let guard = lock(&self.cancelled);
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, delay, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        !*guard
    }

    fn is_cancelled(&self) -> bool {
        *lock(&self.cancelled)
    }
}

struct PendingExpiry {
    signal: Arc<CancelSignal>,
    handle: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One-shot timer that can be re-armed and cancelled.
pub struct IdleTimer {
    name: String,
    delay: Duration,
    pending: Mutex<Vec<PendingExpiry>>,
    #[cfg(test)]
    fail_next_arm: std::sync::atomic::AtomicBool,
}

impl IdleTimer {
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            pending: Mutex::new(Vec::new()),
            #[cfg(test)]
            fail_next_arm: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arms the timer to run `on_expire` after the delay.
    ///
    /// Never blocks on a running callback, so it is safe to call while
    /// holding a lock the callback takes. Timers still outstanding are
    /// superseded: they are told to cancel but are only joined by
    /// [`IdleTimer::cancel`]; a superseded callback that already woke up
    /// still runs and must recognise itself as stale.
    pub fn arm<F>(&self, on_expire: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        #[cfg(test)]
        if self.fail_next_arm.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "thread spawn refused").into());
        }

        let mut pending = lock(&self.pending);
        for expiry in pending.iter() {
            expiry.signal.cancel();
        }
        pending.retain(|expiry| !expiry.handle.is_finished());

        let signal = Arc::new(CancelSignal::default());
        let thread_signal = Arc::clone(&signal);
        let delay = self.delay;

        let handle = thread::Builder::new()
            .name(format!("{}-idle", self.name))
            .spawn(move || {
                if thread_signal.wait(delay) {
                    on_expire();
                }
            })?;

        debug!("{}: idle timer armed for {:?}", self.name, delay);
        pending.push(PendingExpiry { signal, handle });
        Ok(())
    }

    /// Cancels every outstanding timer and waits for their threads to exit.
    ///
    /// Must not be called while holding a lock that the expiry callback takes.
    pub fn cancel(&self) {
        // Take the handles out first so `arm` is never blocked behind a join.
        let pending = std::mem::take(&mut *lock(&self.pending));
        for expiry in pending {
            expiry.signal.cancel();
            if expiry.handle.join().is_err() {
                warn!("{}: idle timer callback panicked", self.name);
            }
        }
    }

    /// Whether a timer is armed and has neither fired nor been cancelled.
    pub fn is_armed(&self) -> bool {
        lock(&self.pending)
            .iter()
            .any(|expiry| !expiry.signal.is_cancelled() && !expiry.handle.is_finished())
    }
}

#[cfg(test)]
impl IdleTimer {
    /// Makes the next `arm` fail as if the timer thread could not be spawned.
    pub(crate) fn fail_next_arm(&self) {
        self.fail_next_arm
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn test_fires_after_delay() {
        let timer = IdleTimer::new("t", Duration::from_millis(20));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let start = Instant::now();
        timer.arm(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(timer.is_armed());

        while fired.load(Ordering::SeqCst) == 0 {
            assert!(start.elapsed() < Duration::from_secs(5), "timer never fired");
            thread::sleep(Duration::from_millis(5));
        }
        assert!(start.elapsed() >= Duration::from_millis(20));
        timer.cancel();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_prevents_firing() {
        let timer = IdleTimer::new("t", Duration::from_secs(60));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        timer.arm(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        // Returns promptly even though the delay is a minute
        let start = Instant::now();
        timer.cancel();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!timer.is_armed());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rearm_supersedes_previous() {
        let timer = IdleTimer::new("t", Duration::from_millis(30));
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = Arc::clone(&fired);
            timer
                .arm(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        thread::sleep(Duration::from_millis(150));
        timer.cancel();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_waits_for_running_callback() {
        let timer = IdleTimer::new("t", Duration::from_millis(1));
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let (start_flag, done_flag) = (Arc::clone(&started), Arc::clone(&finished));

        timer
            .arm(move || {
                start_flag.store(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(50));
                done_flag.store(1, Ordering::SeqCst);
            })
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while started.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "timer never fired");
            thread::sleep(Duration::from_millis(1));
        }
        timer.cancel();
        // The in-flight callback has completed by the time cancel returns
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_without_arm_is_noop() {
        let timer = IdleTimer::new("t", Duration::from_millis(10));
        timer.cancel();
        assert!(!timer.is_armed());
        assert_eq!(timer.delay(), Duration::from_millis(10));
    }
}
