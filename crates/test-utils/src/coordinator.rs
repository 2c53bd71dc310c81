//! In-memory coordinator and result repository.

use async_trait::async_trait;
use cw_types::{
    Address, CoordinatorClient, CoordinatorError, CoordinatorResult, ReplicateStatus,
    ResultRepository, TaskOffer, B256,
};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

/// Coordinator that serves queued offers and records status reports.
#[derive(Debug, Default)]
pub struct MockCoordinator {
    offers: Mutex<VecDeque<TaskOffer>>,
    statuses: Mutex<Vec<(B256, ReplicateStatus)>>,
    offer_requests: AtomicUsize,
    enclave_challenges: Mutex<Vec<Address>>,
    pings: AtomicUsize,
    unreachable: AtomicBool,
}

impl MockCoordinator {
    /// Queue an offer for the next request.
    pub fn push_offer(&self, offer: TaskOffer) {
        self.offers.lock().push_back(offer);
    }

    /// Make every call fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Statuses reported for a task, in order.
    pub fn statuses(&self, chain_task_id: B256) -> Vec<ReplicateStatus> {
        self.statuses
            .lock()
            .iter()
            .filter(|(id, _)| *id == chain_task_id)
            .map(|(_, status)| *status)
            .collect()
    }

    pub fn offer_requests(&self) -> usize {
        self.offer_requests.load(Ordering::SeqCst)
    }

    /// Enclave address sent with each offer request.
    pub fn enclave_challenges(&self) -> Vec<Address> {
        self.enclave_challenges.lock().clone()
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Wait until `status` was reported for the task.
    ///
    /// Never returns if it is not, so wrap in a timeout.
    pub async fn wait_for_status(&self, chain_task_id: B256, status: ReplicateStatus) {
        while !self.statuses(chain_task_id).contains(&status) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn check(&self) -> CoordinatorResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(CoordinatorError::Http("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinatorClient for MockCoordinator {
    async fn available_replicate(
        &self,
        _worker: Address,
        enclave: Address,
    ) -> CoordinatorResult<Option<TaskOffer>> {
        self.offer_requests.fetch_add(1, Ordering::SeqCst);
        self.enclave_challenges.lock().push(enclave);
        self.check()?;
        Ok(self.offers.lock().pop_front())
    }

    async fn update_replicate_status(
        &self,
        chain_task_id: B256,
        status: ReplicateStatus,
    ) -> CoordinatorResult<()> {
        self.check()?;
        self.statuses.lock().push((chain_task_id, status));
        Ok(())
    }

    async fn ping(&self) -> CoordinatorResult<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.check()
    }
}

/// Result repository that records uploaded archive sizes.
#[derive(Debug, Default)]
pub struct MockResultRepository {
    uploads: Mutex<Vec<(B256, usize)>>,
    fail: AtomicBool,
}

impl MockResultRepository {
    pub fn set_failing(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn uploads(&self) -> Vec<(B256, usize)> {
        self.uploads.lock().clone()
    }
}

#[async_trait]
impl ResultRepository for MockResultRepository {
    async fn upload_result(&self, chain_task_id: B256, archive: Vec<u8>) -> CoordinatorResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoordinatorError::Status { endpoint: "/results".to_string(), status: 500 });
        }
        self.uploads.lock().push((chain_task_id, archive.len()));
        Ok(())
    }
}
