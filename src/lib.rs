//! # wirehound
//!
//! **wirehound** is an on-host HTTP traffic monitor built on the `may`
//! coroutine runtime. It taps local network interfaces with libpcap,
//! reconstructs HTTP request heads from TCP payloads, and maintains two live
//! analytical views over the stream: a per-URL-slug request counter that
//! ranks the hottest paths, and a rolling rate detector that alerts when
//! request volume breaks a configured threshold and notifies again when it
//! recovers.
//!
//! ## Architecture
//!
//! - **[`sniff`]** - pcap capture threads, one per interface, dissecting
//!   link/IP/TCP layers and parsing HTTP request heads
//! - **[`dispatcher`]** - bounded queue + worker-coroutine pool fanning
//!   records into the analytics core
//! - **[`alert`]** - atomic deferred-flush counter and the
//!   `Nominal`/`Alerted` state machine with its notification channel
//! - **[`monitor`]** - readers-writer-locked adapter over the time-series
//!   store
//! - **[`timeseries`]** - multi-resolution bucket rings with range/recent
//!   queries and an injectable clock
//! - **[`routes`]** - URL slug normalization, the concurrent request
//!   counter, and top-N ranking
//! - **[`view`]** - ratatui dashboard consuming periodic snapshots
//! - **[`cancel`]** - the cancellation token every background task watches
//!
//! ## Data flow
//!
//! ```text
//! pcap threads --> bounded queue --> workers --+-> AlertDetector::increment
//!                                              +-> RequestCounter::inc_key
//! flush tick: pending counter --> Monitor --> TimeSeries buckets
//! sample tick: Monitor::recent_sum --> state machine --> notify channel
//! ```
//!
//! Request records flow through `may` channels; the hot per-request path is
//! one atomic add and one concurrent-map bump. Everything slower (bucket
//! maintenance, threshold sampling, rendering) happens on its own tick in
//! its own coroutine or thread.

pub mod alert;
pub mod cancel;
pub mod dispatcher;
pub mod monitor;
pub mod routes;
pub mod runtime_config;
pub mod sniff;
pub mod timeseries;
pub mod view;

pub use alert::{AlertConfig, AlertDetector, AlertState, Notification};
pub use cancel::CancelToken;
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use monitor::Monitor;
pub use routes::{http_url_slug, top_n_requests, PathCount, RequestCounter};
pub use sniff::HttpRequestRecord;
pub use timeseries::{Clock, ManualClock, TimeSeries, WallClock};
