//! Cancelable delayed delivery for bursty input such as search keystrokes.

use std::time::Duration;

use tokio::{sync::mpsc, task::JoinHandle, time::sleep};

pub const DEFAULT_SEARCH_DEBOUNCE: Duration = Duration::from_millis(250);

/// Only the most recent scheduled value is ever delivered; scheduling again
/// before the delay elapses replaces the pending one.
pub struct Debouncer<T> {
    delay: Duration,
    tx: mpsc::Sender<T>,
    pending: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(delay: Duration) -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(16);
        (
            Self {
                delay,
                tx,
                pending: None,
            },
            rx,
        )
    }

    /// Must be called inside a tokio runtime.
    pub fn schedule(&mut self, value: T) {
        self.cancel();
        let tx = self.tx.clone();
        let delay = self.delay;
        self.pending = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(value).await;
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}
