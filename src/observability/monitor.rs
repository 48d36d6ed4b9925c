use std::time::Duration;

use super::LatencySnapshot;

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// One-line latency report for the ticks of a reporting window.
pub fn window_report(snapshot: &LatencySnapshot, window: Duration) -> String {
    if snapshot.ticks == 0 {
        return format!("No ticks in the last {:.1} s", window.as_secs_f64());
    }
    let rate = snapshot.ticks as f64 / window.as_secs_f64().max(f64::EPSILON);
    format!(
        "Ticks: {} ({:.1} Hz). Latency min/mean/max: {:.3}/{:.3}/{:.3} ms. Overruns: {}. Errors: {}",
        snapshot.ticks,
        rate,
        ms(snapshot.min_latency),
        ms(snapshot.mean_latency),
        ms(snapshot.max_latency),
        snapshot.overruns,
        snapshot.errors,
    )
}

/// Closing report for a whole session.
pub fn session_report(snapshot: &LatencySnapshot, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let mean_rate = if secs > 0.0 {
        snapshot.ticks as f64 / secs
    } else {
        0.0
    };
    let mut report = format!(
        "Completed run after {:.2} s. Ticks: {}. Mean rate: {:.2} Hz. Commands: {}",
        secs, snapshot.ticks, mean_rate, snapshot.commands
    );
    if snapshot.ticks > 0 {
        report.push_str(&format!(
            ". Worst tick: {:.2} ms",
            ms(snapshot.max_latency)
        ));
    }
    if snapshot.overruns > 0 || snapshot.errors > 0 {
        report.push_str(&format!(
            ". {} overrun{}, {} error{}",
            snapshot.overruns,
            if snapshot.overruns == 1 { "" } else { "s" },
            snapshot.errors,
            if snapshot.errors == 1 { "" } else { "s" },
        ));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window() {
        let report = window_report(&LatencySnapshot::default(), Duration::from_secs(10));
        assert_eq!(report, "No ticks in the last 10.0 s");
    }

    #[test]
    fn test_window_report_fields() {
        let snapshot = LatencySnapshot {
            ticks: 300,
            overruns: 2,
            errors: 0,
            commands: 300,
            min_latency: Duration::from_micros(500),
            mean_latency: Duration::from_millis(1),
            max_latency: Duration::from_millis(40),
        };
        let report = window_report(&snapshot, Duration::from_secs(10));
        assert!(report.contains("Ticks: 300 (30.0 Hz)"));
        assert!(report.contains("0.500/1.000/40.000 ms"));
        assert!(report.contains("Overruns: 2"));
    }

    #[test]
    fn test_session_report_pluralizes() {
        let snapshot = LatencySnapshot {
            ticks: 30,
            overruns: 1,
            errors: 2,
            ..LatencySnapshot::default()
        };
        let report = session_report(&snapshot, Duration::from_secs(1));
        assert!(report.contains("1 overrun, 2 errors"));
    }
}
