//! Container lifecycle: pull, network, create, start, wait, logs, remove.
//!
//! The runtime knows nothing about tasks. Every operation tolerates objects
//! that do not exist and reports failures as values, never panics.

use cw_config::DockerConfig;
use cw_types::{ContainerEngine, ContainerRunSpec, DockerError, DockerResult};
use parking_lot::Mutex;
use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Strip an optional registry host from an image reference.
///
/// Only the last two `/`-separated components are kept, so
/// `docker.io/library/nginx:latest` and `library/nginx:latest` compare equal.
pub fn normalize_image_name(image: &str) -> String {
    let parts: Vec<&str> = image.split('/').collect();
    if parts.len() <= 2 {
        return image.to_string();
    }
    parts[parts.len() - 2..].join("/")
}

/// Runs containers on a [ContainerEngine].
#[derive(Debug)]
pub struct ContainerRuntime<E> {
    engine: Arc<E>,
    config: DockerConfig,
    /// Ids of containers a [Self::run] call is waiting on.
    active: Arc<Mutex<HashSet<String>>>,
}

impl<E> Clone for ContainerRuntime<E> {
    fn clone(&self) -> Self {
        Self { engine: self.engine.clone(), config: self.config.clone(), active: self.active.clone() }
    }
}

impl<E: ContainerEngine> ContainerRuntime<E> {
    /// Create a new instance of [Self].
    pub fn new(engine: Arc<E>, config: DockerConfig) -> Self {
        Self { engine, config, active: Default::default() }
    }

    /// Number of containers still being waited on.
    pub fn active_containers(&self) -> usize {
        self.active.lock().len()
    }

    /// Stop and remove every container a [Self::run] call is still waiting on.
    ///
    /// Used at shutdown, before the network is removed. Returns the number of
    /// containers removed.
    pub async fn stop_active(&self) -> usize {
        let ids: Vec<String> = self.active.lock().drain().collect();
        let mut removed = 0;
        for id in ids {
            info!(target: "worker::docker", container = %id, "stopping task container");
            self.stop_container(&id).await;
            if self.remove_container(&id).await {
                removed += 1;
            }
        }
        removed
    }

    /// The network task containers are attached to.
    pub fn network_name(&self) -> &str {
        &self.config.network_name
    }

    /// Pull `image`. Returns false if the pull failed.
    pub async fn pull_image(&self, image: &str) -> bool {
        match self.engine.pull_image(image).await {
            Ok(()) => {
                info!(target: "worker::docker", image, "image pulled");
                true
            }
            Err(e) => {
                error!(target: "worker::docker", image, ?e, "failed to pull image");
                false
            }
        }
    }

    /// True if a local image matches `image` once both are normalized.
    pub async fn image_exists(&self, image: &str) -> bool {
        let wanted = normalize_image_name(image);
        match self.engine.image_tags().await {
            Ok(tags) => tags.iter().any(|tag| normalize_image_name(tag) == wanted),
            Err(e) => {
                warn!(target: "worker::docker", image, ?e, "failed to list images");
                false
            }
        }
    }

    /// Create the bridge network `name` unless it already exists.
    pub async fn ensure_network(&self, name: &str) -> bool {
        match self.engine.network_id(name).await {
            Ok(Some(_)) => return true,
            Ok(None) => (),
            Err(e) => {
                error!(target: "worker::docker", network = name, ?e, "failed to look up network");
                return false;
            }
        }

        match self.engine.create_network(name).await {
            Ok(id) => {
                info!(target: "worker::docker", network = name, %id, "network created");
                true
            }
            Err(e) => {
                error!(target: "worker::docker", network = name, ?e, "failed to create network");
                false
            }
        }
    }

    /// Remove the network `name`. Absent networks count as removed.
    pub async fn remove_network(&self, name: &str) -> bool {
        let id = match self.engine.network_id(name).await {
            Ok(Some(id)) => id,
            Ok(None) => return true,
            Err(e) => {
                warn!(target: "worker::docker", network = name, ?e, "failed to look up network");
                return false;
            }
        };
        match self.engine.remove_network(&id).await {
            Ok(()) | Err(DockerError::NotFound(_)) => true,
            Err(e) => {
                warn!(target: "worker::docker", network = name, ?e, "failed to remove network");
                false
            }
        }
    }

    /// Run a container and return its captured output.
    ///
    /// Background services (zero max execution time) return an empty string
    /// right after start. Otherwise the call waits for the container to exit,
    /// captures its logs and removes it. A container still running at the
    /// deadline is stopped, removed, and reported as [DockerError::Timeout].
    pub async fn run(&self, spec: &ContainerRunSpec) -> DockerResult<String> {
        let network = self.config.network_name.clone();
        if !self.ensure_network(&network).await {
            return Err(DockerError::Network(network));
        }

        if let Some(name) = &spec.name {
            // at most one container per name
            if matches!(self.engine.container_id(name).await, Ok(Some(_))) {
                info!(target: "worker::docker", container = %name, "replacing existing container");
                self.stop_and_remove(name).await;
            }
        }

        for source in spec.binds.keys() {
            tokio::fs::create_dir_all(source).await?;
        }

        let id = self.engine.create_container(spec, &network).await?;
        let label = spec.name.clone().unwrap_or_else(|| id.clone());
        debug!(target: "worker::docker", container = %label, %id, image = %spec.image, "container created");

        if let Err(e) = self.engine.start_container(&id).await {
            error!(target: "worker::docker", container = %label, ?e, "failed to start container");
            self.remove_container(&id).await;
            return Err(e);
        }
        info!(target: "worker::docker", container = %label, "container started");

        if spec.is_background_service() {
            return Ok(String::new());
        }

        self.active.lock().insert(id.clone());
        let exited = self.wait_for_exit(&id, &label, spec.max_execution_time).await;
        if !self.active.lock().remove(&id) {
            // removed by stop_active
            return Err(DockerError::NotFound(label));
        }

        if !exited {
            warn!(target: "worker::docker", container = %label, "max execution time reached, stopping container");
            self.force_stop(&id).await;
            self.remove_container(&id).await;
            return Err(DockerError::Timeout {
                name: label,
                max_secs: spec.max_execution_time.as_secs(),
            });
        }

        let logs = self.engine.container_logs(&id).await;
        self.remove_container(&id).await;
        match logs {
            Ok(logs) => Ok(logs),
            Err(e) => {
                error!(target: "worker::docker", container = %label, ?e, "failed to capture logs");
                Err(DockerError::Logs(label))
            }
        }
    }

    /// Poll until the container exits or `max` elapses. True if it exited.
    async fn wait_for_exit(&self, id: &str, label: &str, max: Duration) -> bool {
        let start = Instant::now();
        let deadline = start + max;
        let mut last_log = start;
        loop {
            match self.engine.container_state(id).await {
                Ok(Some(state)) if state.is_exited() => return true,
                Ok(Some(_)) => (),
                // vanished containers will not produce more output
                Ok(None) => return true,
                Err(e) => {
                    warn!(target: "worker::docker", container = %label, ?e, "failed to read container status")
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if now.duration_since(last_log) >= self.config.still_running_log_interval {
                info!(
                    target: "worker::docker",
                    container = %label,
                    elapsed = ?now.duration_since(start),
                    "container still running"
                );
                last_log = now;
            }
            let remaining = deadline.saturating_duration_since(now);
            tokio::time::sleep(self.config.status_poll_interval.min(remaining)).await;
        }
    }

    /// Stop then remove the container called `name`.
    ///
    /// Returns true if no such container remains afterwards.
    pub async fn stop_and_remove(&self, name: &str) -> bool {
        let id = match self.engine.container_id(name).await {
            Ok(Some(id)) => id,
            Ok(None) => return true,
            Err(e) => {
                warn!(target: "worker::docker", container = name, ?e, "failed to look up container");
                return false;
            }
        };
        self.stop_container(&id).await;
        self.remove_container(&id).await
    }

    /// Stop the container if it is running or restarting.
    pub async fn stop_container(&self, id: &str) -> bool {
        let stoppable = match self.engine.container_state(id).await {
            Ok(Some(state)) => state.is_stoppable(),
            Ok(None) => return false,
            Err(e) => {
                warn!(target: "worker::docker", container = id, ?e, "failed to read container status");
                return false;
            }
        };
        if !stoppable {
            return true;
        }
        self.force_stop(id).await
    }

    async fn force_stop(&self, id: &str) -> bool {
        match self.engine.stop_container(id).await {
            Ok(()) => true,
            Err(DockerError::NotFound(_)) => false,
            Err(e) => {
                warn!(target: "worker::docker", container = id, ?e, "failed to stop container");
                false
            }
        }
    }

    /// Remove the container. True if it is gone.
    pub async fn remove_container(&self, id: &str) -> bool {
        match self.engine.remove_container(id).await {
            Ok(()) => {
                debug!(target: "worker::docker", container = id, "container removed");
                true
            }
            Err(DockerError::NotFound(_)) => true,
            Err(e) => {
                error!(target: "worker::docker", container = id, ?e, "failed to remove container");
                false
            }
        }
    }

    /// Engine status of the container, if it exists.
    pub async fn status(&self, id: &str) -> Option<String> {
        match self.engine.container_state(id).await {
            Ok(state) => state.map(|s| s.status),
            Err(e) => {
                warn!(target: "worker::docker", container = id, ?e, "failed to read container status");
                None
            }
        }
    }

    /// Exit code of the container, if it exists and has exited.
    pub async fn exit_code(&self, id: &str) -> Option<i64> {
        match self.engine.container_state(id).await {
            Ok(state) => state.and_then(|s| s.exit_code),
            Err(e) => {
                warn!(target: "worker::docker", container = id, ?e, "failed to read exit code");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use cw_test_utils::{EngineCall, MockContainerEngine};

    fn runtime(engine: Arc<MockContainerEngine>) -> ContainerRuntime<MockContainerEngine> {
        ContainerRuntime::new(engine, DockerConfig::default())
    }

    #[test]
    fn test_normalize_image_name() {
        assert_eq!(normalize_image_name("docker.io/library/nginx:latest"), "library/nginx:latest");
        assert_eq!(normalize_image_name("nginx"), "nginx");
        assert_eq!(normalize_image_name("myregistry.com:5000/org/app:tag"), "org/app:tag");
        assert_eq!(normalize_image_name("org/app:tag"), "org/app:tag");
    }

    #[tokio::test]
    async fn test_image_exists_matches_normalized_tags() {
        let engine = Arc::new(MockContainerEngine::default());
        engine.add_image("docker.io/iexechub/vanityeth:1.1.1");
        let runtime = runtime(engine);
        assert!(runtime.image_exists("iexechub/vanityeth:1.1.1").await);
        assert!(runtime.image_exists("registry.example.org:5000/iexechub/vanityeth:1.1.1").await);
        assert!(!runtime.image_exists("iexechub/vanityeth:2.0.0").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_logs_before_deadline() -> eyre::Result<()> {
        let engine = Arc::new(MockContainerEngine::default());
        engine.set_run_duration(Duration::from_secs(5));
        engine.set_logs("hello from the task");
        let runtime = runtime(engine.clone());

        let spec = ContainerRunSpec::new("app:1")
            .with_name("task-1")
            .with_max_execution_time(Duration::from_secs(60));
        let start = Instant::now();
        let stdout = runtime.run(&spec).await?;
        let elapsed = start.elapsed();

        assert_eq!(stdout, "hello from the task");
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_secs(60));
        assert_eq!(engine.live_containers(), 0);
        assert!(!engine.calls().contains(&EngineCall::Stop("task-1".to_string())));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_container_at_deadline() {
        let engine = Arc::new(MockContainerEngine::default());
        engine.set_run_duration(Duration::from_secs(3600));
        let runtime = runtime(engine.clone());

        let spec = ContainerRunSpec::new("app:1")
            .with_name("task-2")
            .with_max_execution_time(Duration::from_secs(10));
        let res = runtime.run(&spec).await;

        assert_matches!(res, Err(DockerError::Timeout { name, max_secs: 10 }) if name == "task-2");
        let calls = engine.calls();
        assert!(calls.contains(&EngineCall::Stop("task-2".to_string())));
        assert!(calls.contains(&EngineCall::Remove("task-2".to_string())));
        assert_eq!(engine.live_containers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_active_removes_waited_containers() -> eyre::Result<()> {
        let engine = Arc::new(MockContainerEngine::default());
        engine.set_run_duration(Duration::from_secs(3600));
        let runtime = runtime(engine.clone());

        let spec = ContainerRunSpec::new("app:1")
            .with_name("task-5")
            .with_max_execution_time(Duration::from_secs(7200));
        let run = tokio::spawn({
            let runtime = runtime.clone();
            async move { runtime.run(&spec).await }
        });
        while runtime.active_containers() == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        assert_eq!(runtime.stop_active().await, 1);
        assert_eq!(engine.live_containers(), 0);
        assert_eq!(runtime.active_containers(), 0);
        assert!(engine.calls().contains(&EngineCall::Stop("task-5".to_string())));

        // the waiting run ends without reading logs of the removed container
        assert_matches!(run.await?, Err(DockerError::NotFound(name)) if name == "task-5");
        assert!(!engine.calls().contains(&EngineCall::Logs("task-5".to_string())));
        Ok(())
    }

    #[tokio::test]
    async fn test_background_service_returns_after_start() -> eyre::Result<()> {
        let engine = Arc::new(MockContainerEngine::default());
        engine.set_run_duration(Duration::from_secs(3600));
        let runtime = runtime(engine.clone());

        let spec = ContainerRunSpec::new("las:1").with_name("las").with_sgx(true).with_port(18766);
        let stdout = runtime.run(&spec).await?;
        assert!(stdout.is_empty());
        assert_eq!(engine.live_containers(), 1);
        assert_eq!(runtime.status("las").await.as_deref(), Some("running"));

        // a second run with the same name replaces the first container
        runtime.run(&spec).await?;
        assert_eq!(engine.live_containers(), 1);
        assert!(engine.calls().contains(&EngineCall::Remove("las".to_string())));

        assert!(runtime.stop_and_remove("las").await);
        assert_eq!(engine.live_containers(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_start_removes_container() {
        let engine = Arc::new(MockContainerEngine::default());
        engine.fail_start();
        let runtime = runtime(engine.clone());

        let spec = ContainerRunSpec::new("app:1")
            .with_name("task-3")
            .with_max_execution_time(Duration::from_secs(10));
        assert!(runtime.run(&spec).await.is_err());
        assert_eq!(engine.live_containers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_capture_failure_is_failure() {
        let engine = Arc::new(MockContainerEngine::default());
        engine.fail_logs();
        let runtime = runtime(engine.clone());

        let spec = ContainerRunSpec::new("app:1")
            .with_name("task-4")
            .with_max_execution_time(Duration::from_secs(10));
        assert_matches!(runtime.run(&spec).await, Err(DockerError::Logs(_)));
        assert_eq!(engine.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_not_found_is_tolerated() {
        let engine = Arc::new(MockContainerEngine::default());
        let runtime = runtime(engine);
        assert_eq!(runtime.status("missing").await, None);
        assert_eq!(runtime.exit_code("missing").await, None);
        assert!(!runtime.stop_container("missing").await);
        assert!(runtime.remove_container("missing").await);
        assert!(runtime.stop_and_remove("missing").await);
    }

    #[tokio::test]
    async fn test_ensure_network_is_idempotent() {
        let engine = Arc::new(MockContainerEngine::default());
        let runtime = runtime(engine.clone());
        assert!(runtime.ensure_network("iexec-worker-net").await);
        assert!(runtime.ensure_network("iexec-worker-net").await);
        let created = engine
            .calls()
            .into_iter()
            .filter(|c| matches!(c, EngineCall::CreateNetwork(_)))
            .count();
        assert_eq!(created, 1);
        assert!(runtime.remove_network("iexec-worker-net").await);
        assert!(runtime.remove_network("iexec-worker-net").await);
    }

    #[tokio::test]
    async fn test_bind_sources_are_created() -> eyre::Result<()> {
        let tmp = tempfile::tempdir()?;
        let source = tmp.path().join("task/output");
        let engine = Arc::new(MockContainerEngine::default());
        let runtime = runtime(engine);
        let spec = ContainerRunSpec::new("app:1")
            .with_bind(&source, "/iexec_out")
            .with_max_execution_time(Duration::from_secs(10));
        runtime.run(&spec).await?;
        assert!(source.is_dir());
        Ok(())
    }
}
