use logfan_core::types::MetricsRecord;

const REQUEST_MARKER: &str = "processed in ";

/// Scans log lines for errors and request latencies.
///
/// A line counts as an error if it contains `ERROR`. A line containing
/// `processed in <N>ms` counts as one request with latency `N`. Lines cut by a
/// chunk boundary are analyzed as they are.
pub fn analyze(bytes: &[u8]) -> MetricsRecord {
    let mut out = MetricsRecord::default();
    for line in bytes.split(|b| *b == b'\n') {
        let line = String::from_utf8_lossy(line);
        if line.contains("ERROR") {
            out.error_count += 1;
        }
        if let Some(latency) = request_latency_ms(&line) {
            out.request_count += 1;
            out.total_latency_ms = out.total_latency_ms.saturating_add(latency);
        }
    }
    out
}

fn request_latency_ms(line: &str) -> Option<u64> {
    let idx = line.find(REQUEST_MARKER)?;
    let rest = &line[idx + REQUEST_MARKER.len()..];
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 || !rest[digits_end..].starts_with("ms") {
        return None;
    }
    rest[..digits_end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
2024-01-24 10:15:32.123 INFO Request processed in 127ms
2024-01-24 10:15:33.001 ERROR Database connection failed
2024-01-24 10:15:34.042 INFO Request processed in 95ms
2024-01-24 10:15:35.567 INFO Request processed in 150ms
2024-01-24 10:15:36.789 ERROR Timeout occurred
";

    #[test]
    fn sample_log_metrics() {
        let m = analyze(SAMPLE.as_bytes());
        assert_eq!(
            m,
            MetricsRecord {
                error_count: 2,
                request_count: 3,
                total_latency_ms: 372,
            }
        );
    }

    #[test]
    fn ignores_malformed_latency() {
        assert_eq!(request_latency_ms("processed in ms"), None);
        assert_eq!(request_latency_ms("processed in 12s"), None);
        assert_eq!(request_latency_ms("processed in 12"), None);
        assert_eq!(request_latency_ms("x processed in 7ms y"), Some(7));
    }

    #[test]
    fn split_halves_add_up_for_clean_cut() {
        let cut = SAMPLE.find("2024-01-24 10:15:34").unwrap();
        let (a, b) = SAMPLE.as_bytes().split_at(cut);
        assert_eq!(analyze(a) + analyze(b), analyze(SAMPLE.as_bytes()));
    }

    #[test]
    fn empty_input() {
        assert_eq!(analyze(b""), MetricsRecord::default());
    }
}
