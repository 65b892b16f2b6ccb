//! HTTP collaborators of a training session.
//!
//! All of them are traits so a session can run offline or against test doubles.

mod aggregator;
mod discovery;
mod telemetry;

pub use aggregator::{Aggregator, HttpAggregator, NoopAggregator};
pub use discovery::{Announcement, Discovery, HttpDiscovery};
pub use telemetry::{HttpTelemetry, NoopTelemetry, TelemetryReport, TelemetrySink};

/// Joins `path` onto `base` without doubling the separator.
fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{path}", base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_paths() {
        assert_eq!(endpoint("http://h:1", "global"), "http://h:1/global");
        assert_eq!(endpoint("http://h:1/api/", "global"), "http://h:1/api/global");
    }
}
