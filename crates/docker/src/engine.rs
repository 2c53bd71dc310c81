//! [ContainerEngine] backed by the local docker daemon.

use async_trait::async_trait;
use bollard::{
    errors::Error as BollardError,
    models::{ContainerCreateBody, DeviceMapping, HostConfig, NetworkCreateRequest},
    query_parameters::{
        CreateContainerOptionsBuilder, CreateImageOptionsBuilder, InspectContainerOptions,
        InspectNetworkOptions, ListImagesOptionsBuilder, LogsOptionsBuilder,
        RemoveContainerOptionsBuilder, StartContainerOptions, StopContainerOptionsBuilder,
    },
    Docker,
};
use cw_types::{ContainerEngine, ContainerRunSpec, ContainerState, DockerError, DockerResult};
use futures::{StreamExt as _, TryStreamExt as _};
use std::{collections::HashMap, path::PathBuf};
use tracing::debug;

/// Cgroup permissions granted on the enclave device.
const SGX_CGROUP_PERMISSIONS: &str = "rwm";

/// Docker daemon client.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
    /// Host path of the enclave device passed to sgx containers.
    sgx_device: PathBuf,
}

impl DockerEngine {
    /// Connect to the daemon using the local defaults (socket or `DOCKER_HOST`).
    pub fn connect_local(sgx_device: PathBuf) -> DockerResult<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(engine_err)?;
        Ok(Self { docker, sgx_device })
    }

    fn host_config(&self, spec: &ContainerRunSpec, network: &str) -> HostConfig {
        let binds = spec.bind_strings();
        let devices = spec.sgx.then(|| {
            let path = self.sgx_device.display().to_string();
            vec![DeviceMapping {
                path_on_host: Some(path.clone()),
                path_in_container: Some(path),
                cgroup_permissions: Some(SGX_CGROUP_PERMISSIONS.to_string()),
            }]
        });
        HostConfig {
            network_mode: Some(network.to_string()),
            binds: (!binds.is_empty()).then_some(binds),
            devices,
            ..Default::default()
        }
    }
}

fn engine_err(e: BollardError) -> DockerError {
    DockerError::Engine(e.to_string())
}

/// Map a daemon 404 to [DockerError::NotFound].
fn not_found_or(e: BollardError, what: &str) -> DockerError {
    match e {
        BollardError::DockerResponseServerError { status_code: 404, .. } => {
            DockerError::NotFound(what.to_string())
        }
        e => engine_err(e),
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn pull_image(&self, image: &str) -> DockerResult<()> {
        let options = CreateImageOptionsBuilder::default().from_image(image).build();
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(info) = stream.next().await {
            let info = info.map_err(|_| DockerError::ImageUnavailable(image.to_string()))?;
            if let Some(status) = info.status {
                debug!(target: "worker::docker", image, %status, "pull progress");
            }
        }
        Ok(())
    }

    async fn image_tags(&self) -> DockerResult<Vec<String>> {
        let options = ListImagesOptionsBuilder::default().all(false).build();
        let images = self.docker.list_images(Some(options)).await.map_err(engine_err)?;
        Ok(images.into_iter().flat_map(|image| image.repo_tags).collect())
    }

    async fn network_id(&self, name: &str) -> DockerResult<Option<String>> {
        match self.docker.inspect_network(name, None::<InspectNetworkOptions>).await {
            Ok(network) => Ok(network.id),
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => Ok(None),
            Err(e) => Err(engine_err(e)),
        }
    }

    async fn create_network(&self, name: &str) -> DockerResult<String> {
        let request = NetworkCreateRequest {
            name: name.to_string(),
            driver: Some("bridge".to_string()),
            ..Default::default()
        };
        let network = self.docker.create_network(request).await.map_err(engine_err)?;
        if network.id.is_empty() {
            return Err(DockerError::Network(name.to_string()));
        }
        Ok(network.id)
    }

    async fn remove_network(&self, id: &str) -> DockerResult<()> {
        self.docker.remove_network(id).await.map_err(|e| not_found_or(e, id))
    }

    async fn container_id(&self, name: &str) -> DockerResult<Option<String>> {
        match self.docker.inspect_container(name, None::<InspectContainerOptions>).await {
            Ok(container) => Ok(container.id),
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => Ok(None),
            Err(e) => Err(engine_err(e)),
        }
    }

    async fn create_container(
        &self,
        spec: &ContainerRunSpec,
        network: &str,
    ) -> DockerResult<String> {
        let options = spec
            .name
            .as_deref()
            .map(|name| CreateContainerOptionsBuilder::default().name(name).build());
        let exposed_ports = spec
            .port
            .map(|port| HashMap::from([(format!("{port}/tcp"), HashMap::new())]));
        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
            env: (!spec.env.is_empty()).then(|| spec.env_vars()),
            exposed_ports,
            host_config: Some(self.host_config(spec, network)),
            ..Default::default()
        };
        let response = self.docker.create_container(options, body).await.map_err(engine_err)?;
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> DockerResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| not_found_or(e, id))
    }

    async fn container_state(&self, id: &str) -> DockerResult<Option<ContainerState>> {
        let container =
            match self.docker.inspect_container(id, None::<InspectContainerOptions>).await {
                Ok(container) => container,
                Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => {
                    return Ok(None)
                }
                Err(e) => return Err(engine_err(e)),
            };
        let state = container.state.unwrap_or_default();
        Ok(Some(ContainerState {
            status: state.status.map(|s| s.to_string()).unwrap_or_default(),
            exit_code: state.exit_code,
        }))
    }

    async fn stop_container(&self, id: &str) -> DockerResult<()> {
        let options = StopContainerOptionsBuilder::default().t(0).build();
        self.docker.stop_container(id, Some(options)).await.map_err(|e| not_found_or(e, id))
    }

    async fn container_logs(&self, id: &str) -> DockerResult<String> {
        let options = LogsOptionsBuilder::default().stdout(true).stderr(true).build();
        let chunks: Vec<_> = self
            .docker
            .logs(id, Some(options))
            .map_ok(|output| output.to_string())
            .try_collect()
            .await
            .map_err(|e| not_found_or(e, id))?;
        Ok(chunks.concat())
    }

    async fn remove_container(&self, id: &str) -> DockerResult<()> {
        let options = RemoveContainerOptionsBuilder::default().force(true).build();
        self.docker.remove_container(id, Some(options)).await.map_err(|e| not_found_or(e, id))
    }
}
