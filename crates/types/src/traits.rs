//! Seams between the worker core and its collaborators.
//!
//! Each external system (chain RPC, container engine, push channel,
//! coordinator, local results, secrets service) is reached through one of
//! these traits so the core can be driven by in-memory implementations in
//! tests.

use crate::{
    Address, ChainAccount, ChainContribution, ChainResult, ChainTask, ContainerRunSpec,
    ContainerState, ContributeRequest, CoordinatorResult, DatasetResult, DockerResult,
    PubSubResult, ReplicateStatus, ResultStoreResult, SecretsResult, Signature,
    TaskAuthorization, TaskOffer, TxOutcome, B256, U256,
};
use async_trait::async_trait;
use std::{fmt, path::PathBuf};

/// Access to the hub contract and the chain it lives on.
///
/// Implementations only translate calls. Serialization of writes and receipt
/// confirmation happen in the chain service.
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// The wallet address used to sign transactions.
    fn worker_address(&self) -> Address;

    async fn chain_task(&self, chain_task_id: B256) -> ChainResult<ChainTask>;

    async fn chain_contribution(
        &self,
        chain_task_id: B256,
        worker: Address,
    ) -> ChainResult<ChainContribution>;

    async fn chain_account(&self, account: Address) -> ChainResult<ChainAccount>;

    /// Native balance in wei.
    async fn balance(&self, account: Address) -> ChainResult<U256>;

    /// Current gas price in wei.
    async fn gas_price(&self) -> ChainResult<u128>;

    async fn last_block(&self) -> ChainResult<u64>;

    /// Broadcast `contributeABILegacy` and wait for its receipt.
    async fn send_contribute(&self, request: ContributeRequest) -> ChainResult<TxOutcome>;

    /// Broadcast `reveal` and wait for its receipt.
    async fn send_reveal(&self, chain_task_id: B256, result_digest: B256)
        -> ChainResult<TxOutcome>;
}

/// The local container engine.
///
/// Lookups return `Ok(None)` when the object does not exist.
#[async_trait]
pub trait ContainerEngine: Send + Sync + 'static {
    async fn pull_image(&self, image: &str) -> DockerResult<()>;

    /// Repository tags of every local image.
    async fn image_tags(&self) -> DockerResult<Vec<String>>;

    async fn network_id(&self, name: &str) -> DockerResult<Option<String>>;

    /// Create a bridge network and return its id.
    async fn create_network(&self, name: &str) -> DockerResult<String>;

    async fn remove_network(&self, id: &str) -> DockerResult<()>;

    async fn container_id(&self, name: &str) -> DockerResult<Option<String>>;

    /// Create a container attached to `network` and return its id.
    async fn create_container(&self, spec: &ContainerRunSpec, network: &str)
        -> DockerResult<String>;

    async fn start_container(&self, id: &str) -> DockerResult<()>;

    async fn container_state(&self, id: &str) -> DockerResult<Option<ContainerState>>;

    /// Stop immediately.
    async fn stop_container(&self, id: &str) -> DockerResult<()>;

    /// Captured stdout and stderr.
    async fn container_logs(&self, id: &str) -> DockerResult<String>;

    /// Force remove.
    async fn remove_container(&self, id: &str) -> DockerResult<()>;
}

/// Identifier of one subscription on the push session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message delivered on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub subscription: SubscriptionId,
    pub destination: String,
    pub body: String,
}

/// The long-lived push connection to the coordinator.
///
/// Subscribing only queues a frame on the connection, so both calls are
/// synchronous. Messages arrive on the receiver handed out when the session
/// was opened.
pub trait PushSession: Send + Sync + 'static {
    fn subscribe(&self, destination: &str) -> PubSubResult<SubscriptionId>;

    fn unsubscribe(&self, subscription: &SubscriptionId) -> PubSubResult<()>;
}

/// The coordinator's HTTP API.
#[async_trait]
pub trait CoordinatorClient: Send + Sync + 'static {
    /// Ask for one replicate. `Ok(None)` when nothing is available.
    async fn available_replicate(
        &self,
        worker: Address,
        enclave: Address,
    ) -> CoordinatorResult<Option<TaskOffer>>;

    async fn update_replicate_status(
        &self,
        chain_task_id: B256,
        status: ReplicateStatus,
    ) -> CoordinatorResult<()>;

    async fn ping(&self) -> CoordinatorResult<()>;
}

/// Storage for uploaded results.
#[async_trait]
pub trait ResultRepository: Send + Sync + 'static {
    async fn upload_result(&self, chain_task_id: B256, archive: Vec<u8>) -> CoordinatorResult<()>;
}

/// Local task results on disk.
#[async_trait]
pub trait ResultStore: Send + Sync + 'static {
    /// Directory mounted as the task's input.
    fn input_dir(&self, chain_task_id: B256) -> PathBuf;

    /// Directory mounted as the task's output.
    fn output_dir(&self, chain_task_id: B256) -> PathBuf;

    async fn save_stdout(&self, chain_task_id: B256, stdout: &str) -> ResultStoreResult<()>;

    /// Deterministic hash of the stored output.
    async fn deterministic_hash(&self, chain_task_id: B256) -> ResultStoreResult<B256>;

    /// Signature written by the enclave, if any.
    async fn enclave_signature(&self, chain_task_id: B256) -> ResultStoreResult<Option<Signature>>;

    /// Archive of the output directory.
    async fn archive(&self, chain_task_id: B256) -> ResultStoreResult<Vec<u8>>;

    /// Discard everything stored for the task. Absent tasks are not an error.
    async fn remove(&self, chain_task_id: B256) -> ResultStoreResult<()>;
}

/// The secrets and enclave session service.
#[async_trait]
pub trait SecretsClient: Send + Sync + 'static {
    /// Fetch and store the secrets of a task.
    async fn fetch_task_secrets(&self, auth: &TaskAuthorization) -> SecretsResult<()>;

    /// Create an enclave session and return its id.
    async fn create_tee_session(&self, auth: &TaskAuthorization) -> SecretsResult<String>;
}

/// Dataset preparation for standard computations.
#[async_trait]
pub trait DatasetService: Send + Sync + 'static {
    /// True if a dataset key was provisioned for the task.
    async fn is_decryption_needed(&self, chain_task_id: B256) -> bool;

    /// Decrypt the dataset in place and return the plaintext path.
    async fn decrypt(&self, chain_task_id: B256, dataset_name: &str) -> DatasetResult<PathBuf>;
}
