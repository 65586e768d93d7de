//! Per-stage file processing metrics.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};
use crate::types::Stage;

pub struct StageMetrics;

impl StageMetrics {
    pub fn record_file_processed(stage: Stage, duration_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "files", "processed"), "stage" => stage.as_str())
            .increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "file", "duration_seconds"), "stage" => stage.as_str())
            .record(duration_secs);
    }

    pub fn record_file_failed(stage: Stage, duration_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "files", "failed"), "stage" => stage.as_str())
            .increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "file", "duration_seconds"), "stage" => stage.as_str())
            .record(duration_secs);
    }

    /// Files waiting in a stage's input directory.
    pub fn record_backlog(stage: Stage, waiting: usize) {
        ::metrics::gauge!(phase_metric!(gauge, "stage", "backlog"), "stage" => stage.as_str())
            .set(waiting as f64);
    }

    pub fn record_rows_loaded(rows: usize) {
        ::metrics::counter!(phase_metric!(counter, "rows", "loaded")).increment(rows as u64);
    }

    pub fn record_duplicate_load_skipped() {
        ::metrics::counter!(phase_metric!(counter, "loads", "duplicate_skipped")).increment(1);
    }
}

impl PhaseMetrics for StageMetrics {
    fn register_metrics() {
        use metrics::{counter, gauge, histogram};

        for stage in [Stage::Extraction, Stage::Transformation, Stage::Loading] {
            let _ = counter!(phase_metric!(counter, "files", "processed"), "stage" => stage.as_str());
            let _ = counter!(phase_metric!(counter, "files", "failed"), "stage" => stage.as_str());
            let _ = histogram!(phase_metric!(histogram, "file", "duration_seconds"), "stage" => stage.as_str());
            let _ = gauge!(phase_metric!(gauge, "stage", "backlog"), "stage" => stage.as_str());
        }
        let _ = counter!(phase_metric!(counter, "rows", "loaded"));
        let _ = counter!(phase_metric!(counter, "loads", "duplicate_skipped"));
    }

    fn phase_name() -> &'static str {
        "stages"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "files", "processed"),
                metric_type: MetricType::Counter,
                help: "Files a stage finished successfully",
                labels: vec!["stage"],
            },
            MetricDoc {
                name: phase_metric!(counter, "files", "failed"),
                metric_type: MetricType::Counter,
                help: "Files a stage failed on",
                labels: vec!["stage"],
            },
            MetricDoc {
                name: phase_metric!(histogram, "file", "duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Time spent on one file",
                labels: vec!["stage"],
            },
            MetricDoc {
                name: phase_metric!(gauge, "stage", "backlog"),
                metric_type: MetricType::Gauge,
                help: "Qualifying files waiting in the stage input directory",
                labels: vec!["stage"],
            },
            MetricDoc {
                name: phase_metric!(counter, "rows", "loaded"),
                metric_type: MetricType::Counter,
                help: "Rows inserted into the table store",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "loads", "duplicate_skipped"),
                metric_type: MetricType::Counter,
                help: "Loads skipped because the ledger already recorded them",
                labels: vec![],
            },
        ]
    }
}
