//! Background retransmission scheduler.

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use log::{debug, error};
use shared::error::{Error, Result};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Work polled by a [`RetransmissionScheduler`].
pub trait WorkProducer: Send + Sync {
    fn has_work(&self) -> bool;

    fn do_work(&self) -> Result<()>;
}

/// Builder for the [`RetransmissionScheduler`].
pub struct SchedulerBuilder {
    interval: Duration,
    thread_name: String,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            thread_name: "rtc-retransmission".to_owned(),
        }
    }
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long an idle scheduler sleeps before polling again.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Spawns the scheduler thread.
    pub fn build(self, producer: Arc<dyn WorkProducer>) -> Result<RetransmissionScheduler> {
        let closed = Arc::new(AtomicBool::new(false));
        let (close_tx, close_rx) = bounded::<()>(1);

        let worker = {
            let closed = Arc::clone(&closed);
            let interval = self.interval;
            thread::Builder::new()
                .name(self.thread_name)
                .spawn(move || {
                    while !closed.load(Ordering::Acquire) {
                        if poll(producer.as_ref()) {
                            continue;
                        }
                        match close_rx.recv_timeout(interval) {
                            Err(RecvTimeoutError::Timeout) => {}
                            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        }
                    }
                    debug!("retransmission scheduler stopped");
                })
                .map_err(|err| Error::ErrSchedulerSpawn(err.to_string()))?
        };

        Ok(RetransmissionScheduler {
            closed,
            close_tx: Some(close_tx),
            worker: Some(worker),
        })
    }
}

/// One scheduling step. Returns whether work was done; failures and panics
/// of the producer are logged and do not stop the loop.
fn poll(producer: &dyn WorkProducer) -> bool {
    let busy = match catch_unwind(AssertUnwindSafe(|| producer.has_work())) {
        Ok(busy) => busy,
        Err(_) => {
            error!("{}: has_work", Error::ErrSchedulerPanicked);
            return false;
        }
    };
    if !busy {
        return false;
    }

    match catch_unwind(AssertUnwindSafe(|| producer.do_work())) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!("retransmission work failed: {err}"),
        Err(_) => error!("{}: do_work", Error::ErrSchedulerPanicked),
    }
    true
}

/// Runs a [`WorkProducer`] on a dedicated thread: back to back while it has
/// work, every `interval` otherwise. Dropping the scheduler closes it.
pub struct RetransmissionScheduler {
    closed: Arc<AtomicBool>,
    close_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl RetransmissionScheduler {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops the thread and waits for it, including any `do_work` in flight.
    /// Calling it again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        // disconnecting wakes a sleeping worker
        self.close_tx.take();

        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        if worker.thread().id() == thread::current().id() {
            return Ok(());
        }
        worker.join().map_err(|_| Error::ErrSchedulerPanicked)
    }
}

impl Drop for RetransmissionScheduler {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!("closing retransmission scheduler: {err}");
        }
    }
}
