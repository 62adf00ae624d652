//! Inactivity timer.
//!
//! A [`Watchdog`] calls its callback when it has not been reset for
//! `timeout`. The boot loop resets it on every new line of console output, so
//! it fires exactly when the machine goes quiet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogStatus {
    Armed,
    /// Stopped for good, either explicitly or after a one-shot fire.
    Stopped,
}

enum Command {
    Reset,
    Stop,
}

struct Shared {
    stopped: AtomicBool,
    deadline: Mutex<Instant>,
}

impl Shared {
    fn deadline(&self) -> MutexGuard<'_, Instant> {
        // Nothing can panic while the lock is held.
        self.deadline.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct Watchdog {
    timeout: Duration,
    tx: Sender<Command>,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    worker: Option<ThreadId>,
}

impl Watchdog {
    /// Arm a watchdog firing `on_timeout` after `timeout` without a reset.
    ///
    /// A one-shot watchdog (`repeating == false`) stops itself after firing.
    /// A repeating one fires again every `timeout` until reset or stopped.
    pub fn start<F>(timeout: Duration, repeating: bool, mut on_timeout: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            stopped: AtomicBool::new(false),
            deadline: Mutex::new(Instant::now() + timeout),
        });
        let worker_shared = Arc::clone(&shared);

        let spawned = std::thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || loop {
                let wait = worker_shared
                    .deadline()
                    .saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(Command::Reset) => continue,
                    Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        if worker_shared.stopped.load(Ordering::Acquire) {
                            break;
                        }
                        // A reset may have moved the deadline after we started waiting.
                        if Instant::now() < *worker_shared.deadline() {
                            continue;
                        }
                        debug!("watchdog fired after {:?}", timeout);
                        on_timeout();
                        if repeating && !worker_shared.stopped.load(Ordering::Acquire) {
                            *worker_shared.deadline() = Instant::now() + timeout;
                        } else {
                            worker_shared.stopped.store(true, Ordering::Release);
                            break;
                        }
                    }
                }
            });

        let (handle, worker) = match spawned {
            Ok(handle) => {
                let id = handle.thread().id();
                (Some(handle), Some(id))
            }
            Err(e) => {
                warn!("failed to start watchdog thread, it will never fire: {}", e);
                shared.stopped.store(true, Ordering::Release);
                (None, None)
            }
        };
        debug!("watchdog armed for {:?} (repeating: {})", timeout, repeating);

        Self {
            timeout,
            tx,
            shared,
            handle,
            worker,
        }
    }

    /// Re-arm: the next fire is exactly `timeout` from now.
    pub fn reset(&self) {
        if self.status() == WatchdogStatus::Stopped {
            return;
        }
        *self.shared.deadline() = Instant::now() + self.timeout;
        let _ = self.tx.send(Command::Reset);
    }

    /// Stop for good. No callback starts after this returns.
    ///
    /// Safe to call from inside the callback, in which case the timer thread
    /// is not joined (it exits as soon as the callback returns).
    pub fn stop(&mut self) {
        let was_stopped = self.shared.stopped.swap(true, Ordering::AcqRel);
        let _ = self.tx.send(Command::Stop);
        if self.worker == Some(std::thread::current().id()) {
            return;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        if !was_stopped {
            debug!("watchdog stopped");
        }
    }

    pub fn status(&self) -> WatchdogStatus {
        if self.shared.stopped.load(Ordering::Acquire) {
            WatchdogStatus::Stopped
        } else {
            WatchdogStatus::Armed
        }
    }

    /// Time left before the next fire, zero once stopped.
    pub fn remaining(&self) -> Duration {
        if self.status() == WatchdogStatus::Stopped {
            return Duration::ZERO;
        }
        self.shared
            .deadline()
            .saturating_duration_since(Instant::now())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_one_shot_fires_once_then_stops() {
        let (count, callback) = counter();
        let watchdog = Watchdog::start(Duration::from_millis(30), false, callback);
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(watchdog.status(), WatchdogStatus::Stopped);
        assert_eq!(watchdog.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_repeating_fires_until_stopped() {
        let (count, callback) = counter();
        let mut watchdog = Watchdog::start(Duration::from_millis(20), true, callback);
        std::thread::sleep(Duration::from_millis(300));
        watchdog.stop();
        let fired = count.load(Ordering::SeqCst);
        assert!(fired >= 2, "fired {} times", fired);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::SeqCst), fired);
    }

    #[test]
    fn test_reset_postpones_fire() {
        let (count, callback) = counter();
        let watchdog = Watchdog::start(Duration::from_millis(200), false, callback);
        for _ in 0..5 {
            std::thread::sleep(Duration::from_millis(60));
            watchdog.reset();
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(watchdog.status(), WatchdogStatus::Armed);
        assert!(watchdog.remaining() > Duration::from_millis(100));
    }

    #[test]
    fn test_stop_before_deadline_never_fires() {
        let (count, callback) = counter();
        let mut watchdog = Watchdog::start(Duration::from_millis(50), false, callback);
        watchdog.stop();
        assert_eq!(watchdog.status(), WatchdogStatus::Stopped);
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        watchdog.reset();
        assert_eq!(watchdog.status(), WatchdogStatus::Stopped);
    }

    #[test]
    fn test_stop_while_callback_runs_prevents_due_fire() {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        // With a 1ms period the next fire is already due when the callback returns.
        let mut watchdog = Watchdog::start(Duration::from_millis(1), true, move || {
            inner.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(150));
        });
        std::thread::sleep(Duration::from_millis(40));
        watchdog.stop();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_repeating_reset_mid_interval_postpones_next_fire() {
        let (count, callback) = counter();
        let mut watchdog = Watchdog::start(Duration::from_millis(200), true, callback);
        std::thread::sleep(Duration::from_millis(100));
        watchdog.reset();

        // 250ms after start, 150ms after the reset.
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        watchdog.stop();
    }

    #[test]
    fn test_drop_stops_timer() {
        let (count, callback) = counter();
        drop(Watchdog::start(Duration::from_millis(30), true, callback));
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
