use async_trait::async_trait;
use comms::specs::TrainingProgress;
use reqwest::Client;
use serde::Serialize;

use super::endpoint;
use crate::{Result, WorkerErr};

/// A progress report sent to the telemetry service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryReport {
    pub device_id: String,
    pub model_id: String,
    pub task: String,
    #[serde(flatten)]
    pub progress: TrainingProgress,
}

/// Where progress reports go.
///
/// Reports are best effort, callers log failures and move on.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn report(&self, report: &TelemetryReport) -> Result<()>;
}

/// Posts reports as JSON to `{server}/telemetry`.
#[derive(Debug, Clone)]
pub struct HttpTelemetry {
    client: Client,
    url: String,
}

impl HttpTelemetry {
    pub fn new(client: Client, server: &str) -> Self {
        Self {
            client,
            url: endpoint(server, "telemetry"),
        }
    }
}

#[async_trait]
impl TelemetrySink for HttpTelemetry {
    async fn report(&self, report: &TelemetryReport) -> Result<()> {
        let response = self.client.post(&self.url).json(report).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkerErr::Telemetry(format!(
                "{} answered {status}",
                self.url
            )));
        }

        Ok(())
    }
}

/// Drops every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

#[async_trait]
impl TelemetrySink for NoopTelemetry {
    async fn report(&self, _report: &TelemetryReport) -> Result<()> {
        Ok(())
    }
}
