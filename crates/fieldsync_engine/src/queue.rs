//! Queue and watch coordination.
//!
//! Tracks transfers in flight. The watch is torn down when the first one
//! is enqueued so the engine never observes its own writes, and restarted
//! once the queue drains and a settle delay has passed. Above a burst
//! threshold per-file notifications are replaced by one aggregate
//! notification at drain.

use crate::error::SyncResult;
use crate::notifier::{Notifier, NotifyCode, NotifyContext};
use crate::watcher::WatchService;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Debug, Default)]
struct QueueState {
    in_flight: usize,
    notify_enabled: bool,
    burst_failed: bool,
    watching: bool,
    /// The watch was requested and has not been shut down.
    enabled: bool,
    /// Bumped on every drain; a pending restart only fires for its own drain.
    drains: u64,
}

struct QueueInner {
    state: Mutex<QueueState>,
    watch: Arc<dyn WatchService>,
    notifier: Arc<dyn Notifier>,
    settle_delay: Duration,
    burst_threshold: usize,
}

/// Counter of in-flight transfers coordinating the watch service.
#[derive(Clone)]
pub struct TransferQueue {
    inner: Arc<QueueInner>,
}

impl TransferQueue {
    /// Creates an idle queue. The watch is not started.
    pub fn new(
        watch: Arc<dyn WatchService>,
        notifier: Arc<dyn Notifier>,
        settle_delay: Duration,
        burst_threshold: usize,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    notify_enabled: true,
                    ..Default::default()
                }),
                watch,
                notifier,
                settle_delay,
                burst_threshold,
            }),
        }
    }

    /// Registers a transfer. The watch is stopped if it is running.
    ///
    /// The returned ticket must be finished when the transfer reaches a
    /// terminal state; dropping it counts as a failure.
    pub fn enqueue(&self) -> QueueTicket {
        let stop_watch = {
            let mut state = self.inner.state.lock();
            state.in_flight += 1;
            if state.in_flight > self.inner.burst_threshold && state.notify_enabled {
                state.notify_enabled = false;
                state.burst_failed = false;
            }
            info!(in_flight = state.in_flight, "files left in queue");
            std::mem::take(&mut state.watching)
        };
        if stop_watch {
            self.inner.watch.stop();
        }
        QueueTicket {
            queue: self.clone(),
            done: false,
        }
    }

    fn dequeue(&self, ok: bool) {
        let mut state = self.inner.state.lock();
        if !ok {
            state.burst_failed = true;
        }
        if state.in_flight == 0 {
            error!("transfer finished with an empty queue");
            return;
        }
        state.in_flight -= 1;
        info!(in_flight = state.in_flight, "files left in queue");
        if state.in_flight > 0 {
            return;
        }

        let aggregate = (!state.notify_enabled).then(|| {
            if state.burst_failed {
                error!("some or all transfers failed");
                NotifyCode::ComplexError
            } else {
                NotifyCode::AllDownloadsComplete
            }
        });
        state.notify_enabled = true;
        state.burst_failed = false;
        state.drains += 1;
        let drain = state.drains;
        drop(state);

        if let Some(code) = aggregate {
            self.inner.notifier.notify(code, &NotifyContext::none());
        }
        self.schedule_restart(drain);
    }

    fn schedule_restart(&self, drain: u64) {
        let queue = self.clone();
        let delay = self.inner.settle_delay;
        let restart = async move {
            tokio::time::sleep(delay).await;
            queue.restart_after_drain(drain);
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(restart);
            }
            Err(_) => {
                error!("no async runtime to restart the watch");
            }
        }
    }

    fn restart_after_drain(&self, drain: u64) {
        {
            let mut state = self.inner.state.lock();
            if !state.enabled || state.drains != drain || state.in_flight > 0 || state.watching {
                debug!("watch restart superseded");
                return;
            }
            state.watching = true;
        }
        if let Err(e) = self.inner.watch.start() {
            error!(error = %e, "failed to restart watch");
            self.inner.state.lock().watching = false;
        }
    }

    /// Enables the watch and starts it unless transfers are in flight. When
    /// they are, the drain starts it.
    pub fn start_watch_if_idle(&self) -> SyncResult<()> {
        {
            let mut state = self.inner.state.lock();
            state.enabled = true;
            if state.in_flight > 0 || state.watching {
                return Ok(());
            }
            state.watching = true;
        }
        if let Err(e) = self.inner.watch.start() {
            self.inner.state.lock().watching = false;
            return Err(e);
        }
        Ok(())
    }

    /// Stops the watch for good. Later drains do not restart it.
    pub fn stop_watch(&self) {
        let was_watching = {
            let mut state = self.inner.state.lock();
            state.enabled = false;
            std::mem::take(&mut state.watching)
        };
        if was_watching {
            self.inner.watch.stop();
        }
    }

    /// Delivers a notification unless a burst is suppressing them.
    pub fn notify(&self, code: NotifyCode, context: &NotifyContext) {
        if self.inner.state.lock().notify_enabled {
            self.inner.notifier.notify(code, context);
        } else {
            debug!(%code, "notification suppressed during burst");
        }
    }

    /// Number of transfers in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight
    }

    /// Returns true while the watch is installed.
    pub fn is_watching(&self) -> bool {
        self.inner.state.lock().watching
    }

    /// Returns true while per-file notifications are delivered.
    pub fn notifications_enabled(&self) -> bool {
        self.inner.state.lock().notify_enabled
    }
}

/// A registered transfer.
#[must_use = "a dropped ticket counts as a failed transfer"]
pub struct QueueTicket {
    queue: TransferQueue,
    done: bool,
}

impl QueueTicket {
    /// Marks the transfer as finished.
    pub fn finish(mut self, ok: bool) {
        self.done = true;
        self.queue.dequeue(ok);
    }
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        if !self.done {
            self.queue.dequeue(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::RecordingNotifier;
    use crate::watcher::MockWatcher;
    use proptest::prelude::*;

    const SETTLE: Duration = Duration::from_millis(200);

    fn queue() -> (TransferQueue, Arc<MockWatcher>, Arc<RecordingNotifier>) {
        let watch = Arc::new(MockWatcher::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let queue = TransferQueue::new(
            Arc::clone(&watch) as Arc<dyn WatchService>,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            SETTLE,
            2,
        );
        (queue, watch, notifier)
    }

    #[tokio::test(start_paused = true)]
    async fn first_enqueue_stops_watch() {
        let (queue, watch, _) = queue();
        queue.start_watch_if_idle().unwrap();
        assert_eq!(watch.starts(), 1);

        let a = queue.enqueue();
        let b = queue.enqueue();
        assert_eq!(watch.stops(), 1);
        assert!(!queue.is_watching());
        a.finish(true);
        b.finish(true);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_waits_for_settle_delay() {
        let (queue, watch, _) = queue();
        queue.start_watch_if_idle().unwrap();
        let ticket = queue.enqueue();
        ticket.finish(true);
        assert_eq!(queue.in_flight(), 0);

        tokio::time::sleep(SETTLE - Duration::from_millis(1)).await;
        assert_eq!(watch.starts(), 1);
        assert!(!queue.is_watching());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(watch.starts(), 2);
        assert!(queue.is_watching());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_does_not_start_a_disabled_watch() {
        let (queue, watch, _) = queue();
        queue.enqueue().finish(true);
        tokio::time::sleep(SETTLE * 2).await;
        assert_eq!(watch.starts(), 0);

        queue.start_watch_if_idle().unwrap();
        queue.stop_watch();
        queue.enqueue().finish(true);
        tokio::time::sleep(SETTLE * 2).await;
        assert_eq!(watch.starts(), 1);
        assert_eq!(watch.stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_during_settle_restarts_once() {
        let (queue, watch, _) = queue();
        queue.start_watch_if_idle().unwrap();
        queue.enqueue().finish(true);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let again = queue.enqueue();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(watch.starts(), 1);

        again.finish(true);
        tokio::time::sleep(SETTLE * 3).await;
        assert_eq!(watch.starts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_suppresses_and_aggregates() {
        let (queue, _, notifier) = queue();
        let tickets: Vec<_> = (0..4).map(|_| queue.enqueue()).collect();
        assert!(!queue.notifications_enabled());

        queue.notify(NotifyCode::ReceivedFile, &NotifyContext::none());
        assert!(notifier.codes().is_empty());

        let mut ok = true;
        for ticket in tickets {
            ticket.finish(ok);
            ok = false;
        }
        assert!(queue.notifications_enabled());
        assert_eq!(notifier.codes(), vec![NotifyCode::ComplexError]);
    }

    #[tokio::test(start_paused = true)]
    async fn small_batches_notify_per_file() {
        let (queue, _, notifier) = queue();
        let a = queue.enqueue();
        let b = queue.enqueue();
        queue.notify(NotifyCode::ReceivedFile, &NotifyContext::none());
        a.finish(true);
        b.finish(false);
        assert_eq!(notifier.codes(), vec![NotifyCode::ReceivedFile]);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_burst_reports_all_complete() {
        let (queue, _, notifier) = queue();
        let tickets: Vec<_> = (0..3).map(|_| queue.enqueue()).collect();
        for ticket in tickets {
            ticket.finish(true);
        }
        assert_eq!(notifier.codes(), vec![NotifyCode::AllDownloadsComplete]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_ticket_counts_as_failure() {
        let (queue, _, notifier) = queue();
        let tickets: Vec<_> = (0..3).map(|_| queue.enqueue()).collect();
        drop(tickets);
        assert_eq!(queue.in_flight(), 0);
        assert_eq!(notifier.codes(), vec![NotifyCode::ComplexError]);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_deferred_while_busy() {
        let (queue, watch, _) = queue();
        let ticket = queue.enqueue();
        queue.start_watch_if_idle().unwrap();
        assert_eq!(watch.starts(), 0);

        ticket.finish(true);
        tokio::time::sleep(SETTLE * 2).await;
        assert_eq!(watch.starts(), 1);
    }

    proptest! {
        #[test]
        fn counter_never_negative_and_restarts_once_per_drain(ops in proptest::collection::vec(any::<bool>(), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            rt.block_on(async {
                let (queue, watch, _) = queue();
                queue.start_watch_if_idle().unwrap();
                let mut open = Vec::new();
                let mut drains = 1;
                for enqueue in ops {
                    if enqueue || open.is_empty() {
                        open.push(queue.enqueue());
                    } else if let Some(ticket) = open.pop() {
                        ticket.finish(true);
                        if open.is_empty() {
                            drains += 1;
                            tokio::time::sleep(SETTLE * 2).await;
                            prop_assert_eq!(watch.starts(), drains);
                        }
                    }
                    prop_assert_eq!(queue.in_flight(), open.len());
                }
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
