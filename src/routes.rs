//! Per-URL request accounting: slug normalization, the concurrent request
//! counter, and top-N ranking for the dashboard.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

/// Reduce a request's host + path to its URL slug:
/// `http://<host>/<firstSegmentOr"/">`.
///
/// The path keeps only its first segment, and only when at least one `/`
/// follows that segment; everything else collapses to the root. An empty
/// path (unreachable from a well-formed request line) also maps to the root
/// slug. Idempotent on its path component.
pub fn http_url_slug(host: &str, path: &str) -> String {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let mut segments = trimmed.split('/');
    let first = segments.next().unwrap_or("");
    if !first.is_empty() && segments.next().is_some() {
        format!("http://{host}/{first}")
    } else {
        format!("http://{host}/")
    }
}

/// A ranked slug and its request count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathCount {
    pub path: String,
    pub count: u64,
}

/// Up to `n` entries of `counts` sorted by count descending, ties broken by
/// key so repeated snapshots rank stably. An empty map or `n == 0` yields an
/// empty vector; `n >= counts.len()` yields every entry.
pub fn top_n_requests(counts: &HashMap<String, u64>, n: usize) -> Vec<PathCount> {
    let mut ranked: Vec<PathCount> = counts
        .iter()
        .map(|(path, &count)| PathCount {
            path: path.clone(),
            count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.path.cmp(&b.path)));
    ranked.truncate(n);
    ranked
}

/// Safe concurrent counting of URL slug requests.
///
/// Each key holds an atomic counter, so increments from any number of worker
/// coroutines proceed without a global lock. Counts only ever grow; the
/// keyspace is unbounded, which is acceptable for the slug cardinality seen
/// by an on-host monitor.
#[derive(Default)]
pub struct RequestCounter {
    requests: DashMap<String, AtomicU64>,
}

impl RequestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` to `key`'s tally, inserting a zero entry first if absent.
    pub fn inc_key(&self, key: &str, count: u64) {
        // Fast path: existing key needs no allocation and no write lock on
        // the shard.
        if let Some(entry) = self.requests.get(key) {
            entry.fetch_add(count, Ordering::Relaxed);
            return;
        }
        self.requests
            .entry(key.to_owned())
            .or_default()
            .fetch_add(count, Ordering::Relaxed);
    }

    /// A fresh snapshot of every key's current count.
    ///
    /// Each value is read atomically; across keys the snapshot may straddle
    /// concurrent increments.
    pub fn export(&self) -> HashMap<String, u64> {
        self.requests
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_url_slug_table() {
        let domain = "rusutsu.com";
        let tests = [
            ("/ski/kona/yuki.jpg", "/ski"),
            ("/ski/", "/ski"),
            ("/ski.jpg", "/"),
            ("//", "/"),
            ("/", "/"),
        ];
        for (path, expected) in tests {
            let out = http_url_slug(domain, path);
            assert_eq!(out, format!("http://{domain}{expected}"), "path {path:?}");
        }
    }

    #[test]
    fn test_http_url_slug_converges_under_reapplication() {
        // Root slugs are fixed points; first-segment slugs collapse to the
        // root on re-application and stay there.
        for path in ["/ski.jpg", "//", "/"] {
            let once = http_url_slug("x", path);
            let slug_path = once.trim_start_matches("http://x").to_owned();
            assert_eq!(once, http_url_slug("x", &slug_path));
        }
        let first = http_url_slug("x", "/ski/kona/yuki.jpg");
        assert_eq!(first, "http://x/ski");
        let second = http_url_slug("x", "/ski");
        let third = http_url_slug("x", "/");
        assert_eq!(second, third);
    }

    #[test]
    fn test_inc_key_accumulates() {
        let rc = RequestCounter::new();
        rc.inc_key("http://x/a", 1);
        rc.inc_key("http://x/a", 2);
        rc.inc_key("http://x/b", 5);
        let out = rc.export();
        assert_eq!(out.get("http://x/a"), Some(&3));
        assert_eq!(out.get("http://x/b"), Some(&5));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_export_idempotent_without_increments() {
        let rc = RequestCounter::new();
        rc.inc_key("http://x/a", 7);
        rc.inc_key("http://x/b", 9);
        assert_eq!(rc.export(), rc.export());
    }

    #[test]
    fn test_top_n_requests_table() {
        let counts: HashMap<String, u64> = [
            ("/ski".to_owned(), 100),
            ("/wat".to_owned(), 5),
            ("/google".to_owned(), 1_000),
            ("/".to_owned(), 100_000_000),
        ]
        .into();

        let top = top_n_requests(&counts, 3);
        assert_eq!(
            top,
            vec![
                PathCount {
                    path: "/".to_owned(),
                    count: 100_000_000
                },
                PathCount {
                    path: "/google".to_owned(),
                    count: 1_000
                },
                PathCount {
                    path: "/ski".to_owned(),
                    count: 100
                },
            ]
        );

        // n larger than the map yields everything, still sorted.
        let all = top_n_requests(&counts, 10);
        assert_eq!(all.len(), 4);
        assert_eq!(all[3].path, "/wat");

        assert!(top_n_requests(&counts, 0).is_empty());
        assert!(top_n_requests(&HashMap::new(), 3).is_empty());
    }
}
