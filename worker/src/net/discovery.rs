use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::endpoint;
use crate::{Result, WorkerErr, config::TrainingConfig};

/// What a node tells the resource-discovery service about itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub device_id: String,
    pub model_id: String,
    pub task: String,
    pub capabilities: Vec<String>,
}

impl From<&TrainingConfig> for Announcement {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            device_id: config.device_id.clone(),
            model_id: config.model_id.clone(),
            task: config.task.clone(),
            capabilities: config.capabilities.clone(),
        }
    }
}

/// The external resource-discovery service.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn announce(&self, announcement: &Announcement) -> Result<()>;
}

/// Posts announcements as JSON to `{endpoint}/announce`.
#[derive(Debug, Clone)]
pub struct HttpDiscovery {
    client: Client,
    url: String,
}

impl HttpDiscovery {
    pub fn new(client: Client, base: &str) -> Self {
        Self {
            client,
            url: endpoint(base, "announce"),
        }
    }
}

#[async_trait]
impl Discovery for HttpDiscovery {
    async fn announce(&self, announcement: &Announcement) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(announcement)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(WorkerErr::Upload(format!(
                "{} answered {}",
                self.url,
                response.status()
            )));
        }

        Ok(())
    }
}
