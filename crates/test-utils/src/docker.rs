//! In-memory container engine.

use async_trait::async_trait;
use cw_types::{ContainerEngine, ContainerRunSpec, ContainerState, DockerError, DockerResult};
use parking_lot::Mutex;
use std::{collections::HashMap, time::Duration};
use tokio::time::Instant;

/// Engine calls recorded by [MockContainerEngine], keyed by id or name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Pull(String),
    CreateNetwork(String),
    RemoveNetwork(String),
    Create(String),
    Start(String),
    Stop(String),
    Logs(String),
    Remove(String),
}

#[derive(Debug)]
struct MockContainer {
    started_at: Option<Instant>,
    stopped: bool,
}

#[derive(Debug, Default)]
struct EngineState {
    images: Vec<String>,
    networks: HashMap<String, String>,
    containers: HashMap<String, MockContainer>,
    specs: Vec<ContainerRunSpec>,
    calls: Vec<EngineCall>,
    run_duration: Duration,
    logs: String,
    fail_pull: bool,
    fail_start: bool,
    fail_logs: bool,
    next_id: usize,
}

/// Container engine whose containers run for a fixed (tokio) duration.
///
/// Containers created with a name use the name as id.
#[derive(Debug, Default)]
pub struct MockContainerEngine {
    state: Mutex<EngineState>,
}

impl MockContainerEngine {
    pub fn add_image(&self, image: &str) {
        self.state.lock().images.push(image.to_string());
    }

    /// Time between start and exit of every container.
    pub fn set_run_duration(&self, duration: Duration) {
        self.state.lock().run_duration = duration;
    }

    /// Output returned for every container.
    pub fn set_logs(&self, logs: &str) {
        self.state.lock().logs = logs.to_string();
    }

    pub fn fail_pull(&self) {
        self.state.lock().fail_pull = true;
    }

    pub fn fail_start(&self) {
        self.state.lock().fail_start = true;
    }

    pub fn fail_logs(&self) {
        self.state.lock().fail_logs = true;
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().calls.clone()
    }

    /// Specs of every container created so far.
    pub fn created_specs(&self) -> Vec<ContainerRunSpec> {
        self.state.lock().specs.clone()
    }

    /// Containers created and not yet removed.
    pub fn live_containers(&self) -> usize {
        self.state.lock().containers.len()
    }
}

#[async_trait]
impl ContainerEngine for MockContainerEngine {
    async fn pull_image(&self, image: &str) -> DockerResult<()> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::Pull(image.to_string()));
        if state.fail_pull {
            return Err(DockerError::ImageUnavailable(image.to_string()));
        }
        state.images.push(image.to_string());
        Ok(())
    }

    async fn image_tags(&self) -> DockerResult<Vec<String>> {
        Ok(self.state.lock().images.clone())
    }

    async fn network_id(&self, name: &str) -> DockerResult<Option<String>> {
        Ok(self.state.lock().networks.get(name).cloned())
    }

    async fn create_network(&self, name: &str) -> DockerResult<String> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::CreateNetwork(name.to_string()));
        let id = format!("net-{name}");
        state.networks.insert(name.to_string(), id.clone());
        Ok(id)
    }

    async fn remove_network(&self, id: &str) -> DockerResult<()> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::RemoveNetwork(id.to_string()));
        let before = state.networks.len();
        state.networks.retain(|_, net| net != id);
        if state.networks.len() == before {
            return Err(DockerError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn container_id(&self, name: &str) -> DockerResult<Option<String>> {
        Ok(self.state.lock().containers.contains_key(name).then(|| name.to_string()))
    }

    async fn create_container(
        &self,
        spec: &ContainerRunSpec,
        _network: &str,
    ) -> DockerResult<String> {
        let mut state = self.state.lock();
        let id = match &spec.name {
            Some(name) => name.clone(),
            None => {
                state.next_id += 1;
                format!("container-{}", state.next_id)
            }
        };
        if state.containers.contains_key(&id) {
            return Err(DockerError::Engine(format!("name conflict: {id}")));
        }
        state.calls.push(EngineCall::Create(id.clone()));
        state.specs.push(spec.clone());
        state.containers.insert(id.clone(), MockContainer { started_at: None, stopped: false });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> DockerResult<()> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::Start(id.to_string()));
        if state.fail_start {
            return Err(DockerError::Engine("start failed".to_string()));
        }
        let container =
            state.containers.get_mut(id).ok_or_else(|| DockerError::NotFound(id.to_string()))?;
        container.started_at = Some(Instant::now());
        Ok(())
    }

    async fn container_state(&self, id: &str) -> DockerResult<Option<ContainerState>> {
        let state = self.state.lock();
        let Some(container) = state.containers.get(id) else {
            return Ok(None);
        };
        let (status, exit_code) = match container.started_at {
            _ if container.stopped => ("exited", Some(137)),
            Some(at) if at.elapsed() >= state.run_duration => ("exited", Some(0)),
            Some(_) => ("running", None),
            None => ("created", None),
        };
        Ok(Some(ContainerState { status: status.to_string(), exit_code }))
    }

    async fn stop_container(&self, id: &str) -> DockerResult<()> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::Stop(id.to_string()));
        let container =
            state.containers.get_mut(id).ok_or_else(|| DockerError::NotFound(id.to_string()))?;
        container.stopped = true;
        Ok(())
    }

    async fn container_logs(&self, id: &str) -> DockerResult<String> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::Logs(id.to_string()));
        if state.fail_logs {
            return Err(DockerError::Engine("log stream broken".to_string()));
        }
        if !state.containers.contains_key(id) {
            return Err(DockerError::NotFound(id.to_string()));
        }
        Ok(state.logs.clone())
    }

    async fn remove_container(&self, id: &str) -> DockerResult<()> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::Remove(id.to_string()));
        state.containers.remove(id).map(|_| ()).ok_or_else(|| DockerError::NotFound(id.to_string()))
    }
}
