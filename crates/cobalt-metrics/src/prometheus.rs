//! Prometheus text exposition format.
//!
//! Renders an operation snapshot into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent.

use crate::counters::OperationSnapshot;

/// Render operation counters into Prometheus text format.
///
/// Totals are unlabelled COUNTERs; per-report counters carry
/// `customer`, `project`, `metric` and `report` labels.
pub fn render_prometheus(snapshot: &OperationSnapshot) -> String {
    let mut out = String::new();

    out.push_str("# HELP cobalt_upload_success_total Periodic runs that uploaded without failure.\n");
    out.push_str("# TYPE cobalt_upload_success_total counter\n");
    out.push_str(&format!(
        "cobalt_upload_success_total {}\n",
        snapshot.upload_successes
    ));

    out.push_str("# HELP cobalt_upload_failure_total Envelopes that failed to encrypt or upload.\n");
    out.push_str("# TYPE cobalt_upload_failure_total counter\n");
    out.push_str(&format!(
        "cobalt_upload_failure_total {}\n",
        snapshot.upload_failures
    ));

    out.push_str("# HELP cobalt_generation_failure_total Report generations that failed.\n");
    out.push_str("# TYPE cobalt_generation_failure_total counter\n");
    for r in &snapshot.reports {
        out.push_str(&format!(
            "cobalt_generation_failure_total{{{}}} {}\n",
            labels(r),
            r.generation_failures
        ));
    }

    out.push_str("# HELP cobalt_event_vector_dropped_total Events dropped by the event vector buffer limit.\n");
    out.push_str("# TYPE cobalt_event_vector_dropped_total counter\n");
    for r in &snapshot.reports {
        out.push_str(&format!(
            "cobalt_event_vector_dropped_total{{{}}} {}\n",
            labels(r),
            r.event_vector_drops
        ));
    }

    out.push_str("# HELP cobalt_string_dropped_total Strings dropped by the string buffer limit.\n");
    out.push_str("# TYPE cobalt_string_dropped_total counter\n");
    for r in &snapshot.reports {
        out.push_str(&format!(
            "cobalt_string_dropped_total{{{}}} {}\n",
            labels(r),
            r.string_drops
        ));
    }

    out
}

fn labels(r: &crate::counters::ReportSnapshot) -> String {
    format!(
        "customer=\"{}\",project=\"{}\",metric=\"{}\",report=\"{}\"",
        r.report.customer_id, r.report.project_id, r.report.metric_id, r.report.report_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::ReportSnapshot;
    use cobalt_core::ReportKey;

    #[test]
    fn render_totals() {
        let output = render_prometheus(&OperationSnapshot {
            upload_successes: 3,
            upload_failures: 1,
            generation_failures: 0,
            reports: Vec::new(),
        });

        assert!(output.contains("# TYPE cobalt_upload_success_total counter"));
        assert!(output.contains("cobalt_upload_success_total 3"));
        assert!(output.contains("cobalt_upload_failure_total 1"));
    }

    #[test]
    fn render_report_labels() {
        let output = render_prometheus(&OperationSnapshot {
            reports: vec![ReportSnapshot {
                report: ReportKey::new(1, 2, 3, 4),
                generation_failures: 2,
                event_vector_drops: 5,
                string_drops: 0,
            }],
            ..Default::default()
        });

        assert!(output.contains(
            "cobalt_generation_failure_total{customer=\"1\",project=\"2\",metric=\"3\",report=\"4\"} 2"
        ));
        assert!(output.contains(
            "cobalt_event_vector_dropped_total{customer=\"1\",project=\"2\",metric=\"3\",report=\"4\"} 5"
        ));
    }

    #[test]
    fn render_empty() {
        let output = render_prometheus(&OperationSnapshot::default());
        assert!(output.contains("cobalt_upload_success_total 0"));
        assert!(!output.contains("report=\""));
    }
}
