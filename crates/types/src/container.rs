//! Container invocation values.

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

/// Status reported by the engine for a finished container.
pub const CONTAINER_EXITED: &str = "exited";

/// Description of one container invocation.
///
/// A zero `max_execution_time` starts the container as a background service
/// and does not wait for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerRunSpec {
    pub image: String,
    /// Fixed container name. Any existing container with this name is replaced.
    pub name: Option<String>,
    pub cmd: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Exposed tcp port.
    pub port: Option<u16>,
    /// Host source directory to container destination.
    pub binds: BTreeMap<PathBuf, String>,
    /// Pass the enclave device through to the container.
    pub sgx: bool,
    pub max_execution_time: Duration,
}

impl ContainerRunSpec {
    /// Create a spec for `image` with no options.
    pub fn new(image: impl Into<String>) -> Self {
        Self { image: image.into(), ..Default::default() }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = cmd;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_bind(mut self, source: impl Into<PathBuf>, destination: impl Into<String>) -> Self {
        self.binds.insert(source.into(), destination.into());
        self
    }

    pub fn with_sgx(mut self, sgx: bool) -> Self {
        self.sgx = sgx;
        self
    }

    pub fn with_max_execution_time(mut self, max: Duration) -> Self {
        self.max_execution_time = max;
        self
    }

    /// True if `run` should return right after start.
    pub fn is_background_service(&self) -> bool {
        self.max_execution_time.is_zero()
    }

    /// Environment as `KEY=VALUE` strings.
    pub fn env_vars(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }

    /// Bind mounts as `source:destination` strings.
    pub fn bind_strings(&self) -> Vec<String> {
        self.binds.iter().map(|(src, dst)| format!("{}:{dst}", src.display())).collect()
    }
}

/// Runtime state of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    /// Engine status string, e.g. "running" or "exited".
    pub status: String,
    pub exit_code: Option<i64>,
}

impl ContainerState {
    pub fn is_exited(&self) -> bool {
        self.status == CONTAINER_EXITED
    }

    /// True if stopping the container has any effect.
    pub fn is_stoppable(&self) -> bool {
        matches!(self.status.as_str(), "running" | "restarting")
    }
}
