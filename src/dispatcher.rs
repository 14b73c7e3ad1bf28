//! # Record Dispatcher
//!
//! Fans parsed HTTP request records from the capture threads to a small pool
//! of worker coroutines over a bounded in-memory queue.
//!
//! Each worker performs, in order, the two core updates for a record:
//! increment the alert detector's pending counter, then bump the request
//! counter for the record's URL slug. The queue bound equals the worker
//! count, so a saturated pipeline blocks the capture side: backpressure
//! flows from analytics back to packet intake.
//!
//! ## Configuration
//!
//! - `WIREHOUND_WORKERS`: worker coroutines consuming the queue (default: 5)
//! - `WIREHOUND_QUEUE_BOUND`: maximum queue depth (default: worker count)

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use may::coroutine;
use may::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::alert::AlertDetector;
use crate::cancel::CancelToken;
use crate::routes::{http_url_slug, RequestCounter};
use crate::sniff::HttpRequestRecord;

/// How long a blocked producer sleeps before re-checking queue depth.
const BACKPRESSURE_POLL: Duration = Duration::from_millis(1);

/// Configuration for the record pipeline.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Number of worker coroutines.
    pub num_workers: usize,
    /// Maximum queue depth before producers block.
    pub queue_bound: usize,
    /// Stack size for worker coroutines.
    pub stack_size: usize,
}

impl DispatcherConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let num_workers = std::env::var("WIREHOUND_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(defaults.num_workers);

        let queue_bound = std::env::var("WIREHOUND_QUEUE_BOUND")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(num_workers);

        Self {
            num_workers,
            queue_bound,
            stack_size: crate::runtime_config::RuntimeConfig::from_env().stack_size,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            num_workers: 5,
            queue_bound: 5,
            stack_size: 0x10000, // 64KB
        }
    }
}

/// Counters tracking pipeline health, exported to the dashboard's logs.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Current queue depth (approximate).
    queue_depth: AtomicUsize,
    /// Total records accepted onto the queue.
    dispatched: AtomicU64,
    /// Total records fully processed by a worker.
    completed: AtomicU64,
}

impl PipelineMetrics {
    fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    fn record_completion(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

/// Bounded-queue worker pool feeding the alert detector and request counter.
pub struct Dispatcher {
    config: DispatcherConfig,
    sender: mpsc::Sender<HttpRequestRecord>,
    metrics: Arc<PipelineMetrics>,
    cancel: CancelToken,
}

impl Dispatcher {
    /// Spawn the worker pool. Workers run until the record queue closes,
    /// which happens when every producer handle (and this dispatcher) has
    /// been dropped during shutdown.
    pub fn new(
        config: DispatcherConfig,
        detector: Arc<AlertDetector>,
        counter: Arc<RequestCounter>,
        cancel: CancelToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<HttpRequestRecord>();
        let metrics = Arc::new(PipelineMetrics::default());
        // All workers share the receiver and load-balance across records.
        let rx = Arc::new(rx);

        debug!(
            num_workers = config.num_workers,
            queue_bound = config.queue_bound,
            stack_size = config.stack_size,
            "starting record worker pool"
        );

        for worker_id in 0..config.num_workers {
            let rx = Arc::clone(&rx);
            let detector = Arc::clone(&detector);
            let counter = Arc::clone(&counter);
            let metrics = Arc::clone(&metrics);

            let spawned = unsafe {
                coroutine::Builder::new()
                    .stack_size(config.stack_size)
                    .spawn(move || {
                        debug!(worker_id, "record worker started");
                        loop {
                            match rx.recv() {
                                Ok(record) => {
                                    // Rate view first, then the per-slug tally.
                                    detector.increment(1, record.timestamp);
                                    let slug = http_url_slug(&record.host, &record.path);
                                    trace!(worker_id, %slug, method = %record.method, "record consumed");
                                    counter.inc_key(&slug, 1);
                                    metrics.record_completion();
                                }
                                Err(_) => break,
                            }
                        }
                        debug!(worker_id, "record worker exiting");
                    })
            };
            if let Err(e) = spawned {
                warn!(worker_id, error = %e, "failed to spawn record worker");
            }
        }

        Self {
            config,
            sender: tx,
            metrics,
            cancel,
        }
    }

    /// Enqueue a record, blocking while the queue is at its bound.
    ///
    /// Producers are the OS-thread capture loops, so the backpressure wait
    /// is a plain thread sleep. Returns `false` once cancellation has fired
    /// or the workers are gone; the record is dropped in that case.
    pub fn dispatch(&self, record: HttpRequestRecord) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if self.metrics.queue_depth() < self.config.queue_bound {
                self.metrics.record_dispatch();
                if self.sender.send(record).is_err() {
                    warn!("record queue disconnected; dropping record");
                    self.metrics.record_completion();
                    return false;
                }
                return true;
            }
            std::thread::sleep(BACKPRESSURE_POLL);
        }
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }
}
