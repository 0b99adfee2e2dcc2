//! Bounded outcome queue with a background flush task.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{MetricsSink, OutcomeExporter};
use crate::types::Outcome;

const DEFAULT_BATCH_SIZE: usize = 256;

/// Queued outcomes and the closed flag share one lock, so an outcome is
/// either queued before close (and flushed) or counted as dropped.
#[derive(Default)]
struct QueueState {
    items: VecDeque<Outcome>,
    closed: bool,
}

/// Non-blocking sink in front of a slow [`OutcomeExporter`].
///
/// When the queue is full the oldest outcome is dropped and counted.
pub struct BufferedSink {
    queue: Mutex<QueueState>,
    capacity: usize,
    batch_size: usize,
    dropped: AtomicU64,
    exported: AtomicU64,
    export_errors: AtomicU64,
    notify: Notify,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BufferedSink {
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self {
            queue: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(4096)),
                closed: false,
            }),
            capacity,
            batch_size: DEFAULT_BATCH_SIZE,
            dropped: AtomicU64::new(0),
            exported: AtomicU64::new(0),
            export_errors: AtomicU64::new(0),
            notify: Notify::new(),
            task: Mutex::new(None),
        })
    }

    /// Create the sink and start flushing into `exporter`.
    pub fn spawn(capacity: usize, exporter: Arc<dyn OutcomeExporter>) -> Arc<Self> {
        let sink = Self::new(capacity);
        let handle = tokio::spawn(sink.clone().flush_loop(exporter));
        if let Ok(mut task) = sink.task.lock() {
            *task = Some(handle);
        }
        sink
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn queued(&self) -> usize {
        self.state().items.len()
    }

    pub fn exported(&self) -> u64 {
        self.exported.load(Ordering::Relaxed)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stop accepting, flush what is queued and close the exporter.
    pub async fn close(&self) {
        self.state().closed = true;
        self.notify.notify_one();
        let handle = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "outcome flush task failed");
            }
        }
    }

    /// Up to `max` queued outcomes, plus whether the sink was closed at that moment.
    fn drain(&self, max: usize) -> (Vec<Outcome>, bool) {
        let mut q = self.state();
        let n = q.items.len().min(max);
        (q.items.drain(..n).collect(), q.closed)
    }

    async fn flush_loop(self: Arc<Self>, exporter: Arc<dyn OutcomeExporter>) {
        loop {
            let (batch, closed) = self.drain(self.batch_size);
            if batch.is_empty() {
                if closed {
                    break;
                }
                self.notify.notified().await;
                continue;
            }

            match exporter.export_batch(&batch).await {
                Ok(()) => {
                    self.exported.fetch_add(batch.len() as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    self.export_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, batch = batch.len(), "outcome export failed");
                }
            }
        }

        if let Err(e) = exporter.close().await {
            warn!(error = %e, "outcome exporter close failed");
        }
        debug!(
            exported = self.exported(),
            dropped = self.dropped(),
            "outcome sink closed"
        );
    }
}

impl MetricsSink for BufferedSink {
    fn record(&self, outcome: Outcome) {
        let evicted = {
            let mut q = self.state();
            if q.closed {
                drop(q);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            let evicted = q.items.len() >= self.capacity && q.items.pop_front().is_some();
            q.items.push_back(outcome);
            evicted
        };

        if evicted {
            let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if n.is_power_of_two() {
                warn!(dropped = n, capacity = self.capacity, "outcome queue full, dropping oldest");
            }
        }
        self.notify.notify_one();
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn export_errors(&self) -> u64 {
        self.export_errors.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::sample_outcome;
    use crate::Result;
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Default)]
    struct Collect {
        ids: Mutex<Vec<u64>>,
        closed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl OutcomeExporter for Collect {
        async fn export(&self, outcome: &Outcome) -> Result<()> {
            self.ids.lock().unwrap().push(outcome.intent_id());
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Blocks until released so the queue can fill up.
    struct Gate {
        open: Notify,
        seen: AtomicU64,
    }

    #[async_trait]
    impl OutcomeExporter for Gate {
        async fn export(&self, _: &Outcome) -> Result<()> {
            if self.seen.fetch_add(1, Ordering::SeqCst) == 0 {
                self.open.notified().await;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_flushes_in_order_and_closes() {
        let exporter = Arc::new(Collect::default());
        let sink = BufferedSink::spawn(16, exporter.clone());
        for id in 0..10 {
            sink.record(sample_outcome(id, Some(200)));
        }
        sink.close().await;

        assert_eq!(*exporter.ids.lock().unwrap(), (0..10).collect::<Vec<_>>());
        assert!(exporter.closed.load(Ordering::SeqCst));
        assert_eq!(sink.exported(), 10);
        assert_eq!(sink.dropped(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest() {
        let sink = BufferedSink::new(3);
        for id in 0..5 {
            sink.record(sample_outcome(id, Some(200)));
        }
        assert_eq!(sink.queued(), 3);
        assert_eq!(sink.dropped(), 2);
        let (batch, closed) = sink.drain(10);
        let ids: Vec<_> = batch.iter().map(|o| o.intent_id()).collect();
        assert_eq!(ids, vec![2, 3, 4]);
        assert!(!closed);
    }

    #[tokio::test]
    async fn test_slow_exporter_does_not_block_record() {
        let gate = Arc::new(Gate {
            open: Notify::new(),
            seen: AtomicU64::new(0),
        });
        let sink = BufferedSink::spawn(4, gate.clone());
        sink.record(sample_outcome(0, Some(200)));
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The exporter is parked on the first batch; these must return immediately.
        for id in 1..=10 {
            sink.record(sample_outcome(id, Some(200)));
        }
        assert_eq!(sink.queued(), 4);
        assert_eq!(sink.dropped(), 6);

        gate.open.notify_one();
        sink.close().await;
        assert_eq!(sink.queued(), 0);
    }

    #[tokio::test]
    async fn test_record_after_close_counts_as_dropped() {
        let sink = BufferedSink::spawn(4, Arc::new(Collect::default()));
        sink.close().await;
        sink.record(sample_outcome(1, Some(200)));
        assert_eq!(sink.dropped(), 1);
    }

    struct Failing;

    #[async_trait]
    impl OutcomeExporter for Failing {
        async fn export(&self, _: &Outcome) -> Result<()> {
            Err(crate::Error::runtime_with_context(
                "backend down",
                crate::ErrorContext::new().with_source("test"),
            ))
        }
    }

    #[tokio::test]
    async fn test_export_failures_are_counted() {
        let sink = BufferedSink::spawn(8, Arc::new(Failing));
        sink.record(sample_outcome(1, Some(200)));
        sink.close().await;
        assert!(sink.export_errors() >= 1);
        assert_eq!(sink.exported(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_records_racing_close_are_flushed_or_dropped() {
        for _ in 0..20 {
            let exporter = Arc::new(Collect::default());
            let sink = BufferedSink::spawn(100_000, exporter.clone());

            let mut writers = Vec::new();
            for w in 0..4u64 {
                let sink = sink.clone();
                writers.push(tokio::spawn(async move {
                    for i in 0..500 {
                        sink.record(sample_outcome(w * 1_000 + i, Some(200)));
                        if i % 50 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                }));
            }
            tokio::task::yield_now().await;
            sink.close().await;
            for w in writers {
                w.await.unwrap();
            }

            let exported = exporter.ids.lock().unwrap().len() as u64;
            assert_eq!(sink.queued(), 0);
            assert_eq!(exported, sink.exported());
            assert_eq!(exported + sink.dropped(), 2_000);
        }
    }
}
