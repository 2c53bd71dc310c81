//! Upload of result archives.

use crate::{check_status, http_err};
use async_trait::async_trait;
use cw_types::{CoordinatorResult, ResultRepository, B256};
use reqwest::{header::CONTENT_TYPE, Client};
use std::time::Duration;
use tracing::info;

/// [ResultRepository] accepting `POST {url}/results/{taskId}`.
#[derive(Debug, Clone)]
pub struct HttpResultRepository {
    base: String,
    client: Client,
}

impl HttpResultRepository {
    /// Create a new instance of [Self].
    pub fn new(url: &str, timeout: Duration) -> CoordinatorResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(http_err)?;
        Ok(Self { base: url.trim_end_matches('/').to_string(), client })
    }
}

#[async_trait]
impl ResultRepository for HttpResultRepository {
    async fn upload_result(&self, chain_task_id: B256, archive: Vec<u8>) -> CoordinatorResult<()> {
        let endpoint = format!("{}/results/{chain_task_id}", self.base);
        let bytes = archive.len();
        let resp = self
            .client
            .post(&endpoint)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(archive)
            .send()
            .await
            .map_err(http_err)?;
        check_status(&endpoint, &resp)?;
        info!(target: "worker::coordinator", %chain_task_id, bytes, "result uploaded");
        Ok(())
    }
}
