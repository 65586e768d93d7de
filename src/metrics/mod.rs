//! Metrics for the stage processes
//!
//! Recording goes through the `metrics` facade. A Prometheus recorder is
//! installed at startup; its HTTP listener only starts when an address is
//! configured.

pub mod registry;
pub mod stages;

pub use stages::StageMetrics;

use std::net::SocketAddr;
use std::sync::{Once, OnceLock};
use tracing::{info, warn};

static INIT: Once = Once::new();
static HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// Listener address for the exporter. An unparsable address disables the
/// listener rather than falling back to the exporter's default port.
fn exporter_addr(addr: Option<&str>) -> Option<SocketAddr> {
    let addr_str = addr?;
    match addr_str.parse::<SocketAddr>() {
        Ok(addr) => Some(addr),
        Err(_) => {
            warn!("Invalid metrics addr '{}', exporter disabled", addr_str);
            None
        }
    }
}

/// Initialize the global metrics recorder.
///
/// Idempotent. With `addr` set (e.g. `127.0.0.1:9898`) the exporter serves
/// `/metrics` there; without it, or when it does not parse, metrics are only
/// kept in-process.
pub fn init_metrics(addr: Option<&str>) {
    INIT.call_once(|| {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

        let installed = match exporter_addr(addr) {
            Some(addr) => builder.with_http_listener(addr).install().map(|_| {
                info!("Prometheus HTTP exporter started at http://{}/metrics", addr);
                None
            }),
            None => builder.install_recorder().map(Some),
        };

        match installed {
            Ok(handle) => {
                if let Some(handle) = handle {
                    let _ = HANDLE.set(handle);
                }
                registry::register_all_metrics();
                info!("Stage metrics registered");
            }
            Err(e) => warn!("Failed to install Prometheus recorder: {}", e),
        }
    });
}

/// Render the current metrics in Prometheus text format, when the recorder
/// was installed without an HTTP listener.
pub fn render() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

/// Implemented by each group of metrics so they can be pre-registered and
/// documented in one place.
pub trait PhaseMetrics {
    fn register_metrics();

    fn phase_name() -> &'static str;

    fn metrics_documentation() -> Vec<MetricDoc>;
}

#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
    #[allow(dead_code)]
    pub labels: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub enum MetricType {
    Counter,
    Histogram,
    Gauge,
}

/// Metric names follow `etl_{group}_{name}` with `_total` on counters.
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("etl_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("etl_", $phase, "_", $name)
    };
    (gauge, $phase:literal, $name:literal) => {
        concat!("etl_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;
