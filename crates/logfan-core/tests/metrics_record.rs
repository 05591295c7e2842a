use logfan_core::types::{ByteRange, MetricsRecord, WorkerId};

fn rec(error_count: u64, request_count: u64, total_latency_ms: u64) -> MetricsRecord {
    MetricsRecord {
        error_count,
        request_count,
        total_latency_ms,
    }
}

#[test]
fn merge_sums_fields() {
    let merged = rec(1, 2, 300).merge(&rec(4, 5, 60));
    assert_eq!(merged, rec(5, 7, 360));
}

#[test]
fn merge_is_commutative_and_associative() {
    let a = rec(1, 3, 100);
    let b = rec(0, 2, 50);
    let c = rec(7, 0, 0);
    assert_eq!(a + b, b + a);
    assert_eq!((a + b) + c, a + (b + c));
    assert_eq!(a + MetricsRecord::default(), a);
}

#[test]
fn sum_over_records() {
    let records = [rec(1, 1, 10), rec(2, 2, 20), rec(3, 3, 30)];
    let total: MetricsRecord = records.iter().sum();
    assert_eq!(total, rec(6, 6, 60));
}

#[test]
fn merge_saturates() {
    let merged = rec(u64::MAX, 0, 0).merge(&rec(1, 0, 0));
    assert_eq!(merged.error_count, u64::MAX);
}

#[test]
fn mean_latency() {
    assert_eq!(rec(0, 0, 0).mean_latency_ms(), None);
    assert_eq!(rec(0, 4, 100).mean_latency_ms(), Some(25.0));
}

#[test]
fn byte_range_is_half_open() {
    let r = ByteRange {
        start: 256,
        size: 256,
    };
    assert_eq!(r.end(), 512);
    let tail = ByteRange {
        start: 768,
        size: 232,
    };
    assert_eq!(tail.end(), 1000);
}

#[test]
fn worker_id_rejects_blank() {
    assert!(WorkerId::parse("   ").is_err());
    assert_eq!(WorkerId::parse(" w1 ").unwrap(), WorkerId("w1".to_string()));
}
