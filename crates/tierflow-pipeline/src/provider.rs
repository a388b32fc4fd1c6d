//! Collaborator traits
//!
//! The pipeline consumes a container runtime, a version-control client and a
//! package manager as opaque capabilities. Implementations live in
//! `tierflow-container` (Docker) and `tierflow-host` (git, apt-get).

use crate::error::ToolError;
use crate::resource::{BuildRequest, ContainerSpec, ObservedContainer, ObservedNetwork, ObservedVolume};
use async_trait::async_trait;
use std::path::Path;
use tierflow_core::{HostPackage, NetworkSpec, VolumeSpec};

pub type ToolResult<T> = std::result::Result<T, ToolError>;

/// Container runtime capability
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check that the runtime is reachable and usable
    async fn ping(&self) -> ToolResult<()>;

    async fn inspect_network(&self, name: &str) -> ToolResult<Option<ObservedNetwork>>;

    async fn create_network(&self, spec: &NetworkSpec) -> ToolResult<()>;

    async fn inspect_volume(&self, name: &str) -> ToolResult<Option<ObservedVolume>>;

    async fn create_volume(&self, spec: &VolumeSpec) -> ToolResult<()>;

    /// Resolve an image reference to its local id, `None` if not present
    async fn image_id(&self, reference: &str) -> ToolResult<Option<String>>;

    async fn pull_image(&self, reference: &str) -> ToolResult<()>;

    async fn build_image(&self, request: &BuildRequest) -> ToolResult<()>;

    async fn inspect_container(&self, name: &str) -> ToolResult<Option<ObservedContainer>>;

    /// Create (but do not start) a container from the spec
    async fn create_container(&self, spec: &ContainerSpec) -> ToolResult<()>;

    async fn start_container(&self, name: &str) -> ToolResult<()>;

    /// Force-remove a container (stopping it if running)
    async fn remove_container(&self, name: &str) -> ToolResult<()>;
}

/// Version-control client capability
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Fetch `branch` of `repository` into `dest`, which does not exist yet
    async fn clone_repository(&self, repository: &str, branch: &str, dest: &Path)
    -> ToolResult<()>;
}

/// Host package manager capability
#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn is_installed(&self, package: &HostPackage) -> ToolResult<bool>;

    async fn install(&self, packages: &[HostPackage]) -> ToolResult<()>;
}
