//! # Alert Detector
//!
//! Watches aggregate request volume and notifies when traffic breaks, or
//! recovers from, the configured nominal throughput limit.
//!
//! The hot path is a single atomic add: workers call
//! [`AlertDetector::increment`] and a background flush task materializes the
//! pending count into the [`Monitor`] on a fixed tick, so the per-request
//! cost never touches a lock. A second background task runs the two-state
//! machine (`Nominal` ⇄ `Alerted`), sampling the monitor's trailing window
//! and emitting a [`Notification`] on every transition.
//!
//! External state queries are serialized through the state task via a
//! request/response channel rendezvous, so [`AlertDetector::get_state`]
//! always observes exactly the state the sampler will act on next; the
//! state variable itself is confined to its coroutine.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Local};
use may::coroutine;
use may::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::monitor::Monitor;

/// How often the state task wakes to poll for queries between sample ticks.
const STATE_POLL: Duration = Duration::from_millis(20);

fn format_ts(ts: SystemTime) -> String {
    DateTime::<Local>::from(ts)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// A traffic-state notification emitted on transitions and returned by
/// [`AlertDetector::get_state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Request volume broke the upper limit.
    Alert { hits: u64, ts: SystemTime },
    /// Request volume dropped back under the upper limit.
    Nominal { ts: SystemTime },
    /// The detector's state task has terminated.
    Exited { ts: SystemTime },
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notification::Alert { hits, ts } => write!(
                f,
                "High traffic generated an alert - hits = {}, triggered at {}",
                hits,
                format_ts(*ts)
            ),
            Notification::Nominal { ts } => {
                write!(f, "Traffic returned to nominal levels at {}", format_ts(*ts))
            }
            Notification::Exited { ts } => {
                write!(f, "Alert detection exited at {}", format_ts(*ts))
            }
        }
    }
}

/// The detector's current position in its two-state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    Nominal,
    Alerted,
}

impl AlertState {
    /// One sample tick: read the trailing window and transition on strict
    /// threshold crossings. At exactly the limit neither direction fires.
    fn on_sample(
        self,
        monitor: &Monitor,
        config: &AlertConfig,
        notify: &mpsc::Sender<Notification>,
    ) -> AlertState {
        let hits = monitor.recent_sum(config.test_span);
        let now = SystemTime::now();
        match self {
            AlertState::Nominal if hits > config.upper_limit => {
                warn!(
                    hits,
                    limit = config.upper_limit,
                    "request rate broke threshold"
                );
                let _ = notify.send(Notification::Alert { hits, ts: now });
                AlertState::Alerted
            }
            AlertState::Alerted if hits < config.upper_limit => {
                info!(
                    hits,
                    limit = config.upper_limit,
                    "request rate recovered to nominal"
                );
                let _ = notify.send(Notification::Nominal { ts: now });
                AlertState::Nominal
            }
            state => state,
        }
    }

    /// The notification a `get_state` caller receives for this state.
    fn status(self, monitor: &Monitor, config: &AlertConfig) -> Notification {
        let now = SystemTime::now();
        match self {
            AlertState::Nominal => Notification::Nominal { ts: now },
            AlertState::Alerted => Notification::Alert {
                hits: monitor.recent_sum(config.test_span),
                ts: now,
            },
        }
    }
}

/// Detector tuning, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct AlertConfig {
    /// Requests allowed per `test_span` before alerting.
    pub upper_limit: u64,
    /// Trailing window the rate is measured over.
    pub test_span: Duration,
    /// How often pending increments are materialized into the monitor.
    pub flush_interval: Duration,
    /// How often the state machine samples the monitor.
    pub sample_interval: Duration,
    /// Initial state of the machine.
    pub start_state: AlertState,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            upper_limit: 100,
            test_span: Duration::from_secs(120),
            flush_interval: Duration::from_secs(2),
            sample_interval: Duration::from_secs(2),
            start_state: AlertState::Nominal,
        }
    }
}

/// A `get_state` rendezvous routed through the state task.
struct StateQuery {
    reply_tx: mpsc::Sender<Notification>,
}

/// Notifies when traffic breaks nominal throughput limits.
///
/// Construction spawns the flush and state coroutines; both run until the
/// cancellation token fires. After cancellation, `increment` becomes a
/// benign no-op (pending counts are simply never flushed) and `get_state`
/// reports [`Notification::Exited`].
pub struct AlertDetector {
    monitor: Arc<Monitor>,
    pending: Arc<AtomicU64>,
    query_tx: mpsc::Sender<StateQuery>,
    exited: Arc<AtomicBool>,
}

impl AlertDetector {
    /// Detector over a fresh wall-clock monitor.
    pub fn new(
        cancel: CancelToken,
        config: AlertConfig,
        notify: mpsc::Sender<Notification>,
    ) -> Self {
        Self::with_monitor(Arc::new(Monitor::new()), cancel, config, notify)
    }

    /// Detector over a caller-supplied monitor (tests inject clocked ones).
    pub fn with_monitor(
        monitor: Arc<Monitor>,
        cancel: CancelToken,
        config: AlertConfig,
        notify: mpsc::Sender<Notification>,
    ) -> Self {
        let pending = Arc::new(AtomicU64::new(0));
        let exited = Arc::new(AtomicBool::new(false));
        let (query_tx, query_rx) = mpsc::channel::<StateQuery>();

        spawn_flush_task(
            Arc::clone(&monitor),
            Arc::clone(&pending),
            cancel.clone(),
            config.flush_interval,
        );
        spawn_state_task(
            Arc::clone(&monitor),
            query_rx,
            notify,
            cancel,
            config,
            Arc::clone(&exited),
        );

        Self {
            monitor,
            pending,
            query_tx,
            exited,
        }
    }

    /// Record `count` observed requests.
    ///
    /// The observation timestamp is accepted for interface symmetry with the
    /// monitor, but attribution happens at flush time: the flush task stamps
    /// the whole pending batch with its own wall clock, keeping the hot path
    /// uncontended at the cost of skew bounded by the flush interval.
    pub fn increment(&self, count: u64, _observed: SystemTime) {
        self.pending.fetch_add(count, Ordering::Relaxed);
    }

    /// Current state as seen by the state task itself.
    ///
    /// The query is answered between sample ticks, so the reply is never
    /// stale with respect to the next transition decision. Once the state
    /// task has terminated this returns [`Notification::Exited`].
    pub fn get_state(&self) -> Notification {
        if self.exited.load(Ordering::Acquire) {
            return Notification::Exited {
                ts: SystemTime::now(),
            };
        }
        let (reply_tx, reply_rx) = mpsc::channel();
        if self.query_tx.send(StateQuery { reply_tx }).is_err() {
            return Notification::Exited {
                ts: SystemTime::now(),
            };
        }
        reply_rx.recv().unwrap_or_else(|_| Notification::Exited {
            ts: SystemTime::now(),
        })
    }

    /// Total flushed requests attributed to `[start, end)`.
    pub fn get_span_count(&self, start: SystemTime, end: SystemTime) -> u64 {
        self.monitor.range_sum(start, end)
    }
}

/// Periodically swap the pending register to zero and attribute the batch to
/// the monitor at the flush instant.
fn spawn_flush_task(
    monitor: Arc<Monitor>,
    pending: Arc<AtomicU64>,
    cancel: CancelToken,
    flush_interval: Duration,
) {
    let spawned = unsafe {
        coroutine::Builder::new()
            .stack_size(may::config().get_stack_size())
            .spawn(move || loop {
                coroutine::sleep(flush_interval);
                if cancel.is_cancelled() {
                    break;
                }
                let count = pending.swap(0, Ordering::AcqRel);
                if count > 0 {
                    monitor.increment(count, SystemTime::now());
                    debug!(count, "flushed pending request count");
                }
            })
    };
    spawned.expect("failed to spawn alert flush task");
}

/// Run the state machine: multiplex sample ticks, state queries, and
/// cancellation.
fn spawn_state_task(
    monitor: Arc<Monitor>,
    query_rx: mpsc::Receiver<StateQuery>,
    notify: mpsc::Sender<Notification>,
    cancel: CancelToken,
    config: AlertConfig,
    exited: Arc<AtomicBool>,
) {
    let spawned = unsafe {
        coroutine::Builder::new()
            .stack_size(may::config().get_stack_size())
            .spawn(move || {
                let mut state = config.start_state;
                let mut next_sample = Instant::now() + config.sample_interval;
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if let Ok(query) = query_rx.try_recv() {
                        let _ = query.reply_tx.send(state.status(&monitor, &config));
                        continue;
                    }
                    if Instant::now() >= next_sample {
                        state = state.on_sample(&monitor, &config, &notify);
                        next_sample = Instant::now() + config.sample_interval;
                    } else {
                        coroutine::sleep(STATE_POLL.min(config.sample_interval));
                    }
                }
                exited.store(true, Ordering::Release);
                debug!("alert state task exited");
            })
    };
    spawned.expect("failed to spawn alert state task");
}
