// SPDX-License-Identifier: Apache-2.0
//! Container execution for the worker.
//!
//! [ContainerRuntime] owns the lifecycle of one container invocation on top
//! of any [ContainerEngine](cw_types::ContainerEngine). [DockerEngine] is the
//! engine backed by the local docker daemon.

mod engine;
mod runtime;
pub use engine::DockerEngine;
pub use runtime::{normalize_image_name, ContainerRuntime};
