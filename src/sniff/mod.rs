//! Packet-capture front end.
//!
//! Opens live pcap handles on local interfaces, applies the caller's BPF
//! filter, dissects link/IP/TCP layers, and parses TCP payloads that carry
//! HTTP request heads. Everything that parses becomes an
//! [`HttpRequestRecord`] pushed into the dispatcher's bounded queue; anything
//! that does not is trace-logged and dropped. Capture failures never reach
//! the analytics core; they are logged and confined to the interface's
//! capture thread.

mod detection;
mod intercept;

use std::time::SystemTime;

pub use detection::detect_interfaces;
pub use intercept::{open_capture, run_capture, DEFAULT_SNAPLEN};

/// A reconstructed HTTP request, as delivered to the analytics core.
///
/// Only `timestamp`, `host`, and `path` feed the counters; the method and
/// flow strings exist for trace logging.
#[derive(Debug, Clone)]
pub struct HttpRequestRecord {
    pub timestamp: SystemTime,
    pub host: String,
    pub path: String,
    pub method: String,
    /// TCP flow, `srcPort -> dstPort`.
    pub transport: String,
    /// IP flow, `srcAddr -> dstAddr`.
    pub net: String,
}

/// Capture-layer failures. These are fatal for the interface they occur on
/// but never abort sibling interfaces.
#[derive(Debug)]
pub enum SniffError {
    /// Enumerating capturable devices failed.
    DeviceList { source: pcap::Error },
    /// Opening a live handle on an interface failed (commonly: missing
    /// capture privileges).
    Open { iface: String, source: pcap::Error },
    /// The BPF filter did not compile or could not be applied.
    Filter {
        iface: String,
        filter: String,
        source: pcap::Error,
    },
}

impl std::fmt::Display for SniffError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SniffError::DeviceList { source } => {
                write!(f, "unable to list capture devices: {source}")
            }
            SniffError::Open { iface, source } => {
                write!(f, "unable to open capture on {iface:?}: {source}")
            }
            SniffError::Filter {
                iface,
                filter,
                source,
            } => write!(
                f,
                "unable to apply BPF filter {filter:?} on {iface:?}: {source}"
            ),
        }
    }
}

impl std::error::Error for SniffError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SniffError::DeviceList { source }
            | SniffError::Open { source, .. }
            | SniffError::Filter { source, .. } => Some(source),
        }
    }
}
