//! Cancellable repeating background task.
//!
//! Backs both the run-time refresh poll of the session and the screen
//! composition worker.

use crossbeam_channel::{RecvTimeoutError, Sender};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Cancellation flag shared between a task and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Sticky.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A closure run on its own thread every `interval` until stopped.
///
/// The first tick runs immediately. `stop` is idempotent, wakes the thread
/// out of its wait and joins it, so no tick runs after `stop` returns.
pub struct RepeatingTask {
    name: String,
    cancel: CancelToken,
    stop_tx: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RepeatingTask {
    /// Spawn the task. The tick receives the task's cancellation token and
    /// may end the task itself by returning `ControlFlow::Break`.
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut(&CancelToken) -> ControlFlow<()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let task_name = name.to_string();

        let handle = thread::spawn(move || {
            log::debug!("Task '{}' started ({:?} interval)", task_name, interval);
            while !token.is_cancelled() {
                if tick(&token).is_break() {
                    break;
                }
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            log::debug!("Task '{}' finished", task_name);
        });

        Self {
            name: name.to_string(),
            cancel,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Whether the task thread is still alive.
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Stop the task and wait for its thread to exit.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                // stopping from inside a tick; the loop exits on its own
                return;
            }
            if handle.join().is_err() {
                log::error!("Task '{}' panicked", self.name);
            }
        }
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[test]
    fn test_ticks_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let mut task = RepeatingTask::spawn("counter", Duration::from_millis(5), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        });

        let deadline = Instant::now() + Duration::from_secs(2);
        while count.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        task.stop();
        let after_stop = count.load(Ordering::SeqCst);
        assert!(after_stop >= 3);
        assert!(!task.is_active());

        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);

        // idempotent
        task.stop();
    }

    #[test]
    fn test_stop_interrupts_long_interval() {
        let mut task = RepeatingTask::spawn("slow", Duration::from_secs(60), |_| ControlFlow::Continue(()));
        let started = Instant::now();
        task.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_break_ends_task() {
        let mut task = RepeatingTask::spawn("once", Duration::from_millis(1), |_| ControlFlow::Break(()));
        let deadline = Instant::now() + Duration::from_secs(2);
        while task.is_active() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!task.is_active());
        task.stop();
    }

    #[test]
    fn test_token_reports_cancellation() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }
}
