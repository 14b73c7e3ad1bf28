//! Live capture and HTTP request reconstruction.
//!
//! One capture loop runs per interface, on its own OS thread (libpcap reads
//! block in native code). The handle is opened with a short read timeout so
//! the loop can re-check cancellation even on a quiet wire. Reconstruction
//! is segment-local: a TCP payload that begins with a parsable HTTP request
//! head becomes a record; anything else is dropped at trace level. Requests
//! split across segments are the noise floor this monitor accepts, since
//! the common GET fits one segment.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pcap::{Active, Capture, Linktype, PacketHeader};
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::Packet;
use tracing::{error, info, trace};

use super::{HttpRequestRecord, SniffError};
use crate::cancel::CancelToken;
use crate::dispatcher::Dispatcher;

/// Bytes captured per packet; enough for a link header plus an HTTP head.
pub const DEFAULT_SNAPLEN: i32 = 1600;

/// Read timeout so a quiet interface still honors cancellation.
const CAPTURE_POLL_MS: i32 = 250;

/// Open a live, promiscuous, filtered capture handle on `iface`.
pub fn open_capture(iface: &str, bpf: &str, snaplen: i32) -> Result<Capture<Active>, SniffError> {
    let mut capture = Capture::from_device(iface)
        .map_err(|source| SniffError::Open {
            iface: iface.to_owned(),
            source,
        })?
        .promisc(true)
        .snaplen(snaplen)
        .timeout(CAPTURE_POLL_MS)
        .open()
        .map_err(|source| SniffError::Open {
            iface: iface.to_owned(),
            source,
        })?;
    capture
        .filter(bpf, true)
        .map_err(|source| SniffError::Filter {
            iface: iface.to_owned(),
            filter: bpf.to_owned(),
            source,
        })?;
    Ok(capture)
}

/// Consume packets from `capture` until cancellation, pushing every
/// reconstructed request into the dispatcher. Blocks; intended to own a
/// dedicated thread.
pub fn run_capture(
    cancel: CancelToken,
    mut capture: Capture<Active>,
    iface: String,
    dispatcher: Arc<Dispatcher>,
) {
    let linktype = capture.get_datalink();
    info!(iface = %iface, linktype = ?linktype, "reading packets");
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match capture.next_packet() {
            Ok(packet) => {
                let ts = packet_time(packet.header);
                match parse_record(linktype, packet.data, ts) {
                    Some(record) => {
                        trace!(
                            iface = %iface,
                            host = %record.host,
                            path = %record.path,
                            method = %record.method,
                            transport = %record.transport,
                            net = %record.net,
                            "http request read"
                        );
                        if !dispatcher.dispatch(record) {
                            break;
                        }
                    }
                    None => trace!(iface = %iface, "packet is not an http request head"),
                }
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(e) => {
                error!(iface = %iface, error = %e, "capture read failed");
                break;
            }
        }
    }
    info!(iface = %iface, "capture stopped");
}

/// Capture timestamp as wall-clock time.
fn packet_time(header: &PacketHeader) -> SystemTime {
    let secs = header.ts.tv_sec.max(0) as u64;
    let micros = header.ts.tv_usec.max(0) as u64;
    UNIX_EPOCH + Duration::from_secs(secs) + Duration::from_micros(micros)
}

/// Dissect one captured frame down to an HTTP request record, if it is one.
fn parse_record(linktype: Linktype, data: &[u8], ts: SystemTime) -> Option<HttpRequestRecord> {
    if linktype == Linktype::ETHERNET {
        let eth = EthernetPacket::new(data)?;
        ip_record(eth.get_ethertype(), eth.payload(), ts)
    } else if linktype == Linktype::LINUX_SLL {
        // 16-byte cooked header; protocol sits in the last two bytes.
        if data.len() < 16 {
            return None;
        }
        let proto = EtherType::new(u16::from_be_bytes([data[14], data[15]]));
        ip_record(proto, &data[16..], ts)
    } else if linktype == Linktype::NULL || linktype == Linktype::LOOP {
        // 4-byte address-family header.
        if data.len() < 4 {
            return None;
        }
        ip_by_version(&data[4..], ts)
    } else if linktype == Linktype::RAW {
        ip_by_version(data, ts)
    } else {
        None
    }
}

fn ip_record(ethertype: EtherType, data: &[u8], ts: SystemTime) -> Option<HttpRequestRecord> {
    if ethertype == EtherTypes::Ipv4 {
        ipv4_record(data, ts)
    } else if ethertype == EtherTypes::Ipv6 {
        ipv6_record(data, ts)
    } else {
        None
    }
}

/// Route a bare IP payload by its version nibble.
fn ip_by_version(data: &[u8], ts: SystemTime) -> Option<HttpRequestRecord> {
    let first = *data.first()?;
    match first >> 4 {
        4 => ipv4_record(data, ts),
        6 => ipv6_record(data, ts),
        _ => None,
    }
}

fn ipv4_record(data: &[u8], ts: SystemTime) -> Option<HttpRequestRecord> {
    let ip = Ipv4Packet::new(data)?;
    if ip.get_next_level_protocol() != IpNextHeaderProtocols::Tcp {
        return None;
    }
    let tcp = TcpPacket::new(ip.payload())?;
    record_from_tcp(
        IpAddr::V4(ip.get_source()),
        IpAddr::V4(ip.get_destination()),
        &tcp,
        ts,
    )
}

fn ipv6_record(data: &[u8], ts: SystemTime) -> Option<HttpRequestRecord> {
    let ip = Ipv6Packet::new(data)?;
    if ip.get_next_header() != IpNextHeaderProtocols::Tcp {
        return None;
    }
    let tcp = TcpPacket::new(ip.payload())?;
    record_from_tcp(
        IpAddr::V6(ip.get_source()),
        IpAddr::V6(ip.get_destination()),
        &tcp,
        ts,
    )
}

fn record_from_tcp(
    src: IpAddr,
    dst: IpAddr,
    tcp: &TcpPacket<'_>,
    ts: SystemTime,
) -> Option<HttpRequestRecord> {
    let payload = tcp.payload();
    if payload.is_empty() {
        return None;
    }
    let (method, path, host) = parse_http_head(payload)?;
    Some(HttpRequestRecord {
        timestamp: ts,
        host,
        path,
        method,
        transport: format!("{} -> {}", tcp.get_source(), tcp.get_destination()),
        net: format!("{src} -> {dst}"),
    })
}

/// Parse an HTTP request head out of a TCP payload.
///
/// A complete request line is required; headers may be truncated by the
/// snaplen as long as `Host` made it through. Requests without a `Host`
/// header cannot be slugged and are dropped.
fn parse_http_head(payload: &[u8]) -> Option<(String, String, String)> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut request = httparse::Request::new(&mut headers);
    if request.parse(payload).is_err() {
        return None;
    }
    let method = request.method?.to_owned();
    let path = request.path?.to_owned();
    let host = request
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("host"))
        .and_then(|h| std::str::from_utf8(h.value).ok())
        .map(str::trim)
        .filter(|h| !h.is_empty())?
        .to_owned();
    Some((method, path, host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_http_head_complete_request() {
        let payload = b"GET /ski/kona/yuki.jpg HTTP/1.1\r\nHost: rusutsu.com\r\nUser-Agent: curl\r\n\r\n";
        let (method, path, host) = parse_http_head(payload).expect("head should parse");
        assert_eq!(method, "GET");
        assert_eq!(path, "/ski/kona/yuki.jpg");
        assert_eq!(host, "rusutsu.com");
    }

    #[test]
    fn test_parse_http_head_requires_host() {
        let payload = b"GET / HTTP/1.1\r\nUser-Agent: curl\r\n\r\n";
        assert!(parse_http_head(payload).is_none());
    }

    #[test]
    fn test_parse_http_head_rejects_non_http() {
        assert!(parse_http_head(b"\x16\x03\x01\x02\x00garbage").is_none());
        assert!(parse_http_head(b"SSH-2.0-OpenSSH_9.6\r\n").is_none());
    }

    #[test]
    fn test_parse_http_head_truncated_headers_with_host() {
        // Head cut off mid-header by the snaplen; Host already seen.
        let payload = b"GET /a/b HTTP/1.1\r\nHost: x\r\nAccept: text/ht";
        let parsed = parse_http_head(payload);
        assert_eq!(
            parsed,
            Some(("GET".to_owned(), "/a/b".to_owned(), "x".to_owned()))
        );
    }
}
