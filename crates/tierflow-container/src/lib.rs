//! tierflow-container
//!
//! bollard経由でDockerを操作し、パイプラインの `ContainerRuntime` を実装する。

pub mod context;
pub mod converter;
pub mod docker;
pub mod error;
pub mod image;

pub use context::ContextBuilder;
pub use converter::{port_key, spec_to_container_config};
pub use docker::DockerRuntime;
pub use error::{ContainerError, Result};
