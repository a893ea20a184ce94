//! Property-based tests for routing, selection and config invariants.
//!
//! These tests use proptest to verify invariants that must always hold,
//! regardless of the input.
//!
//! Run with:
//! ```bash
//! cargo test --test property_tests
//! ```

use proptest::prelude::*;
use std::collections::BTreeMap;

// ============================================================================
// Import from the library crate
// ============================================================================

use simlocal::config::{Config, Service};
use simlocal::console::Command;
use simlocal::lb::{RoundRobin, ServicePool, strip_prefix};
use simlocal::supervisor::{LogStream, StreamKind};

fn service(start_port: u16, end_port: u16, replicas: usize) -> Service {
    Service {
        name: "svc".to_string(),
        path: "./svc".to_string(),
        args: Vec::new(),
        start_port,
        end_port,
        replicas,
        route_prefix: "/svc".to_string(),
        env: BTreeMap::new(),
    }
}

fn config_with(svc: Service) -> Config {
    let mut config = Config::default();
    config.services.insert(svc.name.clone(), svc);
    config
}

// ============================================================================
// Round Robin Property Tests
// ============================================================================

proptest! {
    /// Invariant: any k consecutive selections over k backends visit each
    /// backend exactly once.
    #[test]
    fn round_robin_window_visits_each_backend_once(k in 1usize..16, warmup in 0usize..64) {
        let rr = RoundRobin::new();
        for _ in 0..warmup {
            rr.select(k);
        }

        let mut picks: Vec<usize> = (0..k).map(|_| rr.select(k).unwrap()).collect();
        picks.sort_unstable();
        prop_assert_eq!(picks, (0..k).collect::<Vec<_>>());
    }

    /// Invariant: a pool hands out only its own backends, first pick first.
    #[test]
    fn pool_picks_only_members(ports in proptest::collection::btree_set(1024u16..60000, 1..8)) {
        let ports: Vec<u16> = ports.into_iter().collect();
        let pool = ServicePool::new("svc", "/svc", ports.clone());

        prop_assert_eq!(pool.next().unwrap().port(), ports[0]);
        for _ in 0..ports.len() * 2 {
            let picked = pool.next().unwrap().port();
            prop_assert!(ports.contains(&picked));
        }
    }
}

// ============================================================================
// Prefix Routing Property Tests
// ============================================================================

proptest! {
    /// Invariant: a stripped path always starts with "/" and prefixing it
    /// back yields the original path (modulo the bare-prefix case).
    #[test]
    fn strip_prefix_round_trips(
        prefix in "/[a-z]{1,8}",
        rest in "(/[a-z0-9]{0,6}){0,4}",
    ) {
        let path = format!("{prefix}{rest}");
        let stripped = strip_prefix(&prefix, &path).unwrap();

        prop_assert!(stripped.starts_with('/'));
        if rest.is_empty() {
            prop_assert_eq!(stripped, "/");
        } else {
            prop_assert_eq!(format!("{prefix}{stripped}"), path);
        }
    }

    /// Invariant: a path that merely shares leading characters with the
    /// prefix (e.g. "/svcx" vs "/svc") never matches.
    #[test]
    fn strip_prefix_rejects_partial_segments(prefix in "/[a-z]{1,8}", tail in "[a-z0-9]{1,6}") {
        let path = format!("{prefix}{tail}");
        prop_assert!(strip_prefix(&prefix, &path).is_none());
    }
}

// ============================================================================
// Config Validation Property Tests
// ============================================================================

proptest! {
    /// Invariant: end_port <= start_port is always rejected.
    #[test]
    fn validation_rejects_inverted_range(start in 1u16..=u16::MAX, below in 0u16..1000) {
        let end = start.saturating_sub(below);
        let config = config_with(service(start, end, 1));
        prop_assert!(config.validate().is_err());
    }

    /// Invariant: a range with room for every replica passes, one with too
    /// little room fails.
    #[test]
    fn validation_checks_range_capacity(start in 1024u16..50000, width in 1u16..100, replicas in 0usize..120) {
        let end = start + width;
        let config = config_with(service(start, end, replicas));
        let fits = usize::from(width) + 1 >= replicas;
        prop_assert_eq!(config.validate().is_ok(), fits);
    }

    /// Invariant: every replica index within capacity has a port inside the
    /// range, and the first index past it has none.
    #[test]
    fn ports_stay_in_range(start in 1u16..60000, width in 1u16..200) {
        let svc = service(start, start + width, 0);
        let capacity = svc.port_capacity();
        for index in 0..capacity {
            let port = svc.port_for(index).unwrap();
            prop_assert!(port >= svc.start_port && port <= svc.end_port);
        }
        prop_assert!(svc.port_for(capacity).is_none());
    }
}

// ============================================================================
// Console and Log Stream Property Tests
// ============================================================================

proptest! {
    /// Invariant: parsing never panics, and only blank input is `Empty`.
    #[test]
    fn command_parse_total(line in "\\PC{0,40}") {
        let parsed = Command::parse(&line);
        if line.trim().is_empty() {
            prop_assert_eq!(parsed.unwrap(), Command::Empty);
        } else {
            prop_assert!(!matches!(parsed, Ok(Command::Empty)));
        }
    }

    /// Invariant: sequence numbers strictly increase and retention never
    /// exceeds capacity.
    #[test]
    fn log_stream_bounded_and_ordered(capacity in 1usize..32, count in 0usize..100) {
        let logs = LogStream::new(capacity);
        for i in 0..count {
            logs.append("svc-1", StreamKind::Stdout, i.to_string());
        }

        let records = logs.snapshot();
        prop_assert_eq!(records.len(), count.min(capacity));
        prop_assert!(records.windows(2).all(|w| w[0].seq < w[1].seq));
        if let Some(last) = records.last() {
            prop_assert_eq!(&last.message, &(count - 1).to_string());
        }
    }
}
