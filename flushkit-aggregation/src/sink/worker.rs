use std::{
    fmt,
    future::Future,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_utils::sync::{Parker, Unparker};
use flushkit_timesource::TimeSource;
use metrique::writer::BoxEntrySink;

use super::{FlushSink, FlushStats, FlushWorkerError};
use crate::{
    entry::AggregateEntry,
    metrics::AggregateFlush,
    store::{AggregateStore, FlushReason},
    traits::AggregateFactory,
};

/// Builder for [`FlushWorker`]
pub struct FlushWorkerBuilder {
    poll_interval: Duration,
    thread_name: String,
    shutdown_timeout: Duration,
    time_source: Option<TimeSource>,
    metrics_sink: Option<BoxEntrySink>,
}

impl Default for FlushWorkerBuilder {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            thread_name: "aggregate-flush-worker".into(),
            shutdown_timeout: Duration::from_secs(30),
            time_source: None,
            metrics_sink: None,
        }
    }
}

impl FlushWorkerBuilder {
    /// Start from the defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how often the worker checks the store for aggregates to flush.
    ///
    /// Defaults to every second. [`FlushWorker::notify`] wakes the worker early.
    ///
    /// The interval bounds how late a stale aggregate can be flushed, so it can't be greater than
    /// a minute.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        assert!(
            Duration::ZERO < poll_interval && poll_interval < Duration::from_secs(60),
            "poll_interval must be in the range (0, 1 minute), not {poll_interval:?}"
        );
        self.poll_interval = poll_interval;
        self
    }

    /// Thread name assigned to the background thread. Also used as the tracing span field.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(!name.is_empty());
        self.thread_name = name;
        self
    }

    /// Sets how long the worker keeps flushing remaining aggregates once starting to shut down.
    ///
    /// Defaults to 30 seconds. Aggregates still in the store when the timeout passes are left
    /// there.
    pub fn shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        assert!(
            shutdown_timeout > Duration::ZERO,
            "shutdown_timeout must not be zero"
        );
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Clock passed to the store's staleness checks.
    ///
    /// Defaults to the store's own [`time_source`](AggregateStore::time_source), which is the
    /// clock that seeded each aggregate's staleness reference.
    pub fn time_source(mut self, time_source: TimeSource) -> Self {
        self.time_source = Some(time_source);
        self
    }

    /// If set, one `AggregateFlush` metric entry is appended to `sink` per flushed aggregate.
    ///
    /// The entry carries `Stream`, `Reason`, `Records`, `EstimatedBytes`, `Partitions` and
    /// `FlushTime`, the time spent in the [`FlushSink`].
    pub fn metrics_sink(mut self, sink: BoxEntrySink) -> Self {
        self.metrics_sink = Some(sink);
        self
    }

    /// Spawn the worker thread, flushing aggregates from `store` into `sink`.
    ///
    /// Returns a cloneable [`FlushWorker`] handle and a [`FlushWorkerJoinHandle`] that shuts the
    /// worker down, flushing everything left in the store, when dropped.
    pub fn build<F, S>(
        self,
        store: Arc<AggregateStore<F>>,
        sink: S,
    ) -> io::Result<(FlushWorker, FlushWorkerJoinHandle<S::Error>)>
    where
        F: AggregateFactory + 'static,
        F::Aggregate: Sync + 'static,
        S: FlushSink<F::Aggregate> + Send + 'static,
        S::Error: fmt::Debug + Send + 'static,
    {
        let parker = Parker::default();
        let unparker = parker.unparker().clone();
        let (flush_requests, flush_request_receiver) = mpsc::channel();
        let shared = Arc::new(Shared {
            unparker: unparker.clone(),
            flush_requests,
        });
        let shutdown_signal = Arc::new(AtomicBool::new(false));
        let time_source = self
            .time_source
            .unwrap_or_else(|| store.time_source().clone());

        let runner = Runner {
            name: self.thread_name.clone(),
            store,
            sink,
            shared: Arc::clone(&shared),
            poll_interval: self.poll_interval,
            shutdown_timeout: self.shutdown_timeout,
            shutdown_signal: Arc::clone(&shutdown_signal),
            time_source,
            metrics_sink: self.metrics_sink,
            stats: FlushStats::default(),
            parker,
        };

        let handle = thread::Builder::new()
            .name(self.thread_name)
            .spawn(move || runner.run(flush_request_receiver))?;

        Ok((
            FlushWorker(shared),
            FlushWorkerJoinHandle {
                handle: Some(handle),
                shutdown_signal,
                unparker,
            },
        ))
    }
}

struct FlushRequest {
    // dropped once the request is served
    #[allow(unused)]
    channel: tokio::sync::oneshot::Sender<()>,
}

struct Shared {
    unparker: Unparker,
    flush_requests: mpsc::Sender<FlushRequest>,
}

/// Handle to a running flush worker
///
/// Cloning is cheap. See [`FlushWorkerBuilder::build`].
#[derive(Clone)]
pub struct FlushWorker(Arc<Shared>);

impl fmt::Debug for FlushWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushWorker").finish_non_exhaustive()
    }
}

impl FlushWorker {
    /// Wake the worker so it checks the store now rather than at the next poll interval
    ///
    /// Producers can call this after admitting a batch that likely completed an aggregate.
    pub fn notify(&self) {
        self.0.unparker.unpark();
    }

    /// Flush every aggregate in the store, whether or not it is ready
    ///
    /// The returned future resolves once every aggregate present when this was called has been
    /// handed to the sink, or once the worker has stopped. It does not need to be polled for the
    /// flush to happen.
    pub fn flush_all(&self) -> impl Future<Output = ()> + Send + 'static {
        let (channel, receiver) = tokio::sync::oneshot::channel();
        self.0.flush_requests.send(FlushRequest { channel }).ok();
        self.0.unparker.unpark();
        async move {
            let _ = receiver.await;
        }
    }
}

/// Guard handle that, when dropped, stops the worker after flushing every aggregate left in the
/// store.
///
/// Call [`shut_down`](Self::shut_down) instead of dropping it to learn what was flushed or why
/// the worker failed.
pub struct FlushWorkerJoinHandle<E> {
    handle: Option<thread::JoinHandle<Result<FlushStats, E>>>,
    shutdown_signal: Arc<AtomicBool>,
    unparker: Unparker,
}

impl<E> fmt::Debug for FlushWorkerJoinHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushWorkerJoinHandle")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl<E> FlushWorkerJoinHandle<E> {
    /// Drop the handle but let the worker keep running until no [`FlushWorker`]s exist.
    pub fn forget(mut self) {
        self.handle = None;
    }

    /// Stop the worker, flushing every aggregate left in the store, and wait for it.
    ///
    /// Returns totals for the worker's whole lifetime, or the error that stopped it early.
    pub fn shut_down(mut self) -> Result<FlushStats, FlushWorkerError<E>> {
        match self.join() {
            Some(Ok(Ok(stats))) => Ok(stats),
            Some(Ok(Err(err))) => Err(FlushWorkerError::Sink(err)),
            Some(Err(_)) => Err(FlushWorkerError::Panicked),
            None => Ok(FlushStats::default()),
        }
    }

    fn join(&mut self) -> Option<thread::Result<Result<FlushStats, E>>> {
        let handle = self.handle.take()?;
        self.shutdown_signal.store(true, Ordering::Relaxed);
        self.unparker.unpark();
        tracing::info!("awaiting aggregate flush worker shutdown");
        let result = handle.join();
        tracing::info!("aggregate flush worker shut down");
        Some(result)
    }
}

impl<E> Drop for FlushWorkerJoinHandle<E> {
    fn drop(&mut self) {
        match self.join() {
            Some(Ok(Err(_))) => {
                tracing::error!("aggregate flush worker had stopped on a sink error")
            }
            Some(Err(_)) => tracing::error!("aggregate flush worker panicked"),
            _ => {}
        }
    }
}

// Background thread state.
struct Runner<F: AggregateFactory, S> {
    name: String,
    store: Arc<AggregateStore<F>>,
    sink: S,
    shared: Arc<Shared>,
    poll_interval: Duration,
    shutdown_timeout: Duration,
    shutdown_signal: Arc<AtomicBool>,
    time_source: TimeSource,
    metrics_sink: Option<BoxEntrySink>,
    stats: FlushStats,
    // woken by FlushWorker::notify, flush requests and shutdown
    parker: Parker,
}

impl<F, S> Runner<F, S>
where
    F: AggregateFactory,
    F::Aggregate: Sync,
    S: FlushSink<F::Aggregate>,
    S::Error: fmt::Debug,
{
    fn run(mut self, flush_requests: mpsc::Receiver<FlushRequest>) -> Result<FlushStats, S::Error> {
        let span =
            tracing::span!(tracing::Level::TRACE, "aggregate flush worker", worker = ?self.name);
        let _enter = span.enter();

        loop {
            let deadline = Instant::now() + self.poll_interval;
            let status = self.flush_ready(deadline)?;

            let waiting: Vec<FlushRequest> = flush_requests.try_iter().collect();
            if !waiting.is_empty() {
                tracing::debug!(requests = waiting.len(), "flushing all aggregates on request");
                self.flush_all()?;
                // dropping the requests wakes their futures
                drop(waiting);
            }

            if self.shutdown_signal.load(Ordering::Relaxed) {
                tracing::info!("caught shutdown signal, shutting down aggregate flush worker");
                return self.shut_down();
            }
            // the join handle was forgotten and every FlushWorker is gone
            if Arc::get_mut(&mut self.shutdown_signal).is_some()
                && Arc::get_mut(&mut self.shared).is_some()
            {
                tracing::info!("no handles left, shutting down aggregate flush worker");
                return self.shut_down();
            }

            if status == DrainResult::Drained {
                self.parker.park_deadline(deadline);
            }
        }
    }

    fn flush_ready(&mut self, deadline: Instant) -> Result<DrainResult, S::Error> {
        while let Some((reason, entry)) = self
            .store
            .remove_next_complete_with_reason(self.time_source.epoch_millis())
        {
            self.flush(reason, entry)?;
            if Instant::now() >= deadline {
                return Ok(DrainResult::HitDeadline);
            }
        }
        Ok(DrainResult::Drained)
    }

    fn flush_all(&mut self) -> Result<(), S::Error> {
        for key in self.store.keys() {
            if let Some(entry) = self.store.remove(&key) {
                self.flush(FlushReason::Forced, entry)?;
            }
        }
        Ok(())
    }

    fn flush(
        &mut self,
        reason: FlushReason,
        entry: AggregateEntry<F::Aggregate>,
    ) -> Result<(), S::Error> {
        let stream = entry.key().clone();
        let records = entry.record_count_trigger().watermark();
        let bytes = entry.estimated_bytes_trigger().watermark();
        let _metrics = self
            .metrics_sink
            .as_ref()
            .map(|sink| AggregateFlush::start(reason, &entry, sink.clone()));

        tracing::debug!(%stream, %reason, records, bytes, "flushing aggregate");
        match self.sink.flush(reason, entry) {
            Ok(()) => {
                self.stats.record(reason, records, bytes);
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    ?err,
                    %stream,
                    %reason,
                    "flush sink failed, stopping aggregate flush worker"
                );
                Err(err)
            }
        }
    }

    fn shut_down(mut self) -> Result<FlushStats, S::Error> {
        let deadline = Instant::now() + self.shutdown_timeout;
        for key in self.store.keys() {
            if Instant::now() >= deadline {
                tracing::warn!(
                    remaining = self.store.len(),
                    "unable to flush every aggregate while shutting down"
                );
                break;
            }
            if let Some(entry) = self.store.remove(&key) {
                self.flush(FlushReason::Forced, entry)?;
            }
        }
        tracing::info!(
            aggregates = self.stats.aggregates_flushed,
            records = self.stats.records_flushed,
            "aggregate flush worker has shut down"
        );
        Ok(self.stats)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum DrainResult {
    Drained,     // nothing left to flush
    HitDeadline, // more may be ready, but the poll interval is up
}
