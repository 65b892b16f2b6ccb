use async_trait::async_trait;
use comms::Frame;
use log::debug;
use reqwest::{Client, StatusCode, header};

use super::endpoint;
use crate::{Result, WorkerErr};

/// The federated aggregator a worker exchanges adapters with.
#[async_trait]
pub trait Aggregator: Send + Sync {
    /// Uploads an encoded delta frame.
    async fn upload(&self, frame: Vec<u8>) -> Result<()>;

    /// Fetches the current global adapter.
    ///
    /// # Returns
    /// `None` while no global adapter exists yet, i.e. on the first round.
    async fn fetch_global(&self) -> Result<Option<Frame>>;
}

/// Exchanges binary frames with `{server}/updates` and `{server}/global`.
#[derive(Debug, Clone)]
pub struct HttpAggregator {
    client: Client,
    updates_url: String,
    global_url: String,
}

impl HttpAggregator {
    pub fn new(client: Client, server: &str) -> Self {
        Self {
            client,
            updates_url: endpoint(server, "updates"),
            global_url: endpoint(server, "global"),
        }
    }
}

#[async_trait]
impl Aggregator for HttpAggregator {
    async fn upload(&self, frame: Vec<u8>) -> Result<()> {
        let len = frame.len();
        let response = self
            .client
            .post(&self.updates_url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(frame)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(WorkerErr::Upload(format!(
                "{} answered {status}: {detail}",
                self.updates_url
            )));
        }

        debug!(bytes = len; "uploaded delta frame");
        Ok(())
    }

    async fn fetch_global(&self) -> Result<Option<Frame>> {
        let response = self.client.get(&self.global_url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => return Ok(None),
            status if !status.is_success() => {
                return Err(WorkerErr::Upload(format!(
                    "{} answered {status}",
                    self.global_url
                )));
            }
            _ => {}
        }

        let bytes = response.bytes().await?;
        Ok(Some(Frame::decode(&bytes)?))
    }
}

/// An aggregator that never answers, for offline sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAggregator;

#[async_trait]
impl Aggregator for NoopAggregator {
    async fn upload(&self, _frame: Vec<u8>) -> Result<()> {
        Ok(())
    }

    async fn fetch_global(&self) -> Result<Option<Frame>> {
        Ok(None)
    }
}
