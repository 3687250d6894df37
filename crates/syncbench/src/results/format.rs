//! Number formatting utilities.

use crate::results::accumulator::Metric;

/// Format a millisecond value as human-readable latency.
pub fn format_millis(ms: f64) -> String {
    if ms >= 1_000.0 {
        format!("{:.2} s", ms / 1_000.0)
    } else if ms >= 1.0 {
        format!("{ms:.2} ms")
    } else if ms >= 0.001 {
        format!("{:.2} us", ms * 1_000.0)
    } else {
        format!("{:.0} ns", ms * 1_000_000.0)
    }
}

/// Format a byte count.
pub fn format_bytes(bytes: f64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    const GIB: f64 = MIB * 1024.0;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes / GIB)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes / MIB)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes / KIB)
    } else {
        format!("{bytes:.0} B")
    }
}

/// Format a value in the natural unit of `metric`.
pub fn format_metric(metric: Metric, value: f64) -> String {
    match metric {
        Metric::TimeMs => format_millis(value),
        Metric::ActiveThreadCounts => format!("{value:.1}"),
        Metric::NetworkSentBytes
        | Metric::NetworkReceivedBytes
        | Metric::MemoryBytes
        | Metric::DiskBytes => format_bytes(value),
    }
}

/// Format mean ± standard deviation in hyperfine style.
/// Example: "2.45 ms ± 0.34 ms"
pub fn format_mean_sigma(metric: Metric, mean: f64, std_dev: f64) -> String {
    format!("{} ± {}", format_metric(metric, mean), format_metric(metric, std_dev))
}

/// Format range (min … max) in hyperfine style.
/// Example: "1.89 ms … 3.21 ms"
pub fn format_range(metric: Metric, min: f64, max: f64) -> String {
    format!("{} … {}", format_metric(metric, min), format_metric(metric, max))
}
