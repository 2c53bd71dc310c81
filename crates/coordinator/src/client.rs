//! [CoordinatorClient] over the coordinator REST API.

use crate::{check_status, http_err};
use async_trait::async_trait;
use cw_config::CoordinatorConfig;
use cw_types::{
    Address, CoordinatorClient, CoordinatorResult, ReplicateStatus, TaskOffer, B256,
};
use reqwest::{Client, StatusCode};
use tracing::{debug, info};

/// Coordinator client identified by the worker wallet.
#[derive(Debug, Clone)]
pub struct HttpCoordinatorClient {
    base: String,
    client: Client,
    wallet: Address,
}

impl HttpCoordinatorClient {
    /// Create a new instance of [Self].
    pub fn new(config: &CoordinatorConfig, wallet: Address) -> CoordinatorResult<Self> {
        let client = Client::builder().timeout(config.request_timeout).build().map_err(http_err)?;
        Ok(Self { base: config.url.trim_end_matches('/').to_string(), client, wallet })
    }
}

#[async_trait]
impl CoordinatorClient for HttpCoordinatorClient {
    async fn available_replicate(
        &self,
        worker: Address,
        enclave: Address,
    ) -> CoordinatorResult<Option<TaskOffer>> {
        let endpoint = format!("{}/replicates/available", self.base);
        let resp = self
            .client
            .get(&endpoint)
            .query(&[
                ("workerAddress", worker.to_string()),
                ("enclaveChallenge", enclave.to_string()),
            ])
            .send()
            .await
            .map_err(http_err)?;
        if matches!(resp.status(), StatusCode::NO_CONTENT | StatusCode::NOT_FOUND) {
            return Ok(None);
        }
        check_status(&endpoint, &resp)?;
        let offer: TaskOffer = resp.json().await.map_err(http_err)?;
        info!(target: "worker::coordinator", chain_task_id = %offer.chain_task_id(), "replicate offered");
        Ok(Some(offer))
    }

    async fn update_replicate_status(
        &self,
        chain_task_id: B256,
        status: ReplicateStatus,
    ) -> CoordinatorResult<()> {
        let endpoint = format!("{}/replicates/{chain_task_id}/updateStatus", self.base);
        let resp = self
            .client
            .post(&endpoint)
            .query(&[
                ("replicateStatus", status.as_str().to_string()),
                ("walletAddress", self.wallet.to_string()),
            ])
            .send()
            .await
            .map_err(http_err)?;
        check_status(&endpoint, &resp)?;
        debug!(target: "worker::coordinator", %chain_task_id, %status, "status reported");
        Ok(())
    }

    async fn ping(&self) -> CoordinatorResult<()> {
        let endpoint = format!("{}/workers/ping", self.base);
        let resp = self
            .client
            .post(&endpoint)
            .query(&[("walletAddress", self.wallet.to_string())])
            .send()
            .await
            .map_err(http_err)?;
        check_status(&endpoint, &resp)
    }
}
