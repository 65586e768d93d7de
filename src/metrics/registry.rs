//! Registers every metrics group and flags duplicate names.

use crate::metrics::{MetricDoc, PhaseMetrics};
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub fn register_all_metrics() {
    let mut all_metrics = HashMap::new();

    register_phase_metrics::<super::stages::StageMetrics>(&mut all_metrics);

    info!("Registered {} metrics", all_metrics.len());
    for doc in all_metrics.values() {
        debug!("metric {} ({:?}): {}", doc.name, doc.metric_type, doc.help);
    }
}

fn register_phase_metrics<T: PhaseMetrics>(all_metrics: &mut HashMap<String, MetricDoc>) {
    T::register_metrics();
    let phase_name = T::phase_name();

    for doc in T::metrics_documentation() {
        if all_metrics.contains_key(doc.name) {
            warn!("Metric name conflict: '{}' registered twice (phase '{}')", doc.name, phase_name);
        } else {
            all_metrics.insert(doc.name.to_string(), doc);
        }
    }
}
