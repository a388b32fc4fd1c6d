//! Docker実装のコンテナランタイム

use crate::converter::spec_to_container_config;
use crate::error::{ContainerError, not_found_as_none};
use crate::image;
use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{NetworkCreateRequest, VolumeCreateOptions};
use bollard::query_parameters::{
    InspectContainerOptions, InspectNetworkOptions, RemoveContainerOptions, StartContainerOptions,
};
use std::collections::HashMap;
use tierflow_core::{NetworkSpec, VolumeSpec};
use tierflow_pipeline::resource::{
    LABEL_FINGERPRINT, ObservedContainer, ObservedNetwork, ObservedVolume,
};
use tierflow_pipeline::{BuildRequest, ContainerRuntime, ContainerSpec, ToolResult};

/// 管理対象のネットワーク・ボリュームに付与するラベル
const LABEL_MANAGED: &str = "tierflow.managed";

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// ローカルのDockerソケットに接続（疎通確認はしない）
    pub fn connect() -> Result<Self, ContainerError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self::new(docker))
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }
}

fn managed_labels() -> HashMap<String, String> {
    HashMap::from([(LABEL_MANAGED.to_string(), "true".to_string())])
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> ToolResult<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| ContainerError::DockerConnectionFailed(e.to_string()))?;
        Ok(())
    }

    async fn inspect_network(&self, name: &str) -> ToolResult<Option<ObservedNetwork>> {
        let network = not_found_as_none(
            self.docker
                .inspect_network(name, None::<InspectNetworkOptions>)
                .await,
        )?;
        Ok(network.map(|n| ObservedNetwork {
            name: n.name.unwrap_or_else(|| name.to_string()),
            driver: n.driver.unwrap_or_default(),
        }))
    }

    async fn create_network(&self, spec: &NetworkSpec) -> ToolResult<()> {
        let request = NetworkCreateRequest {
            name: spec.name.clone(),
            driver: Some(spec.driver.clone()),
            labels: Some(managed_labels()),
            ..Default::default()
        };

        match self.docker.create_network(request).await {
            Ok(_) => Ok(()),
            // 並行して作成された場合は既存として扱う
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => Ok(()),
            Err(e) => Err(ContainerError::from(e).into()),
        }
    }

    async fn inspect_volume(&self, name: &str) -> ToolResult<Option<ObservedVolume>> {
        let volume = not_found_as_none(self.docker.inspect_volume(name).await)?;
        Ok(volume.map(|v| ObservedVolume {
            name: v.name,
            driver: v.driver,
        }))
    }

    async fn create_volume(&self, spec: &VolumeSpec) -> ToolResult<()> {
        let options = VolumeCreateOptions {
            name: Some(spec.name.clone()),
            driver: Some(spec.driver.clone()),
            labels: Some(managed_labels()),
            ..Default::default()
        };
        self.docker
            .create_volume(options)
            .await
            .map_err(ContainerError::from)?;
        Ok(())
    }

    async fn image_id(&self, reference: &str) -> ToolResult<Option<String>> {
        let image = not_found_as_none(self.docker.inspect_image(reference).await)?;
        Ok(image.and_then(|i| i.id))
    }

    async fn pull_image(&self, reference: &str) -> ToolResult<()> {
        image::pull_image(&self.docker, reference).await?;
        Ok(())
    }

    async fn build_image(&self, request: &BuildRequest) -> ToolResult<()> {
        image::build_image(&self.docker, request).await?;
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> ToolResult<Option<ObservedContainer>> {
        let container = not_found_as_none(
            self.docker
                .inspect_container(name, None::<InspectContainerOptions>)
                .await,
        )?;

        Ok(container.map(|c| ObservedContainer {
            id: c.id.unwrap_or_default(),
            name: c
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| name.to_string()),
            image_id: c.image,
            running: c.state.and_then(|s| s.running).unwrap_or(false),
            fingerprint: c
                .config
                .and_then(|config| config.labels)
                .and_then(|mut labels| labels.remove(LABEL_FINGERPRINT)),
            networks: c
                .network_settings
                .and_then(|settings| settings.networks)
                .map(|networks| networks.into_keys().collect())
                .unwrap_or_default(),
        }))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> ToolResult<()> {
        let (config, options) = spec_to_container_config(spec);
        #[allow(deprecated)]
        self.docker
            .create_container(Some(options), config)
            .await
            .map_err(ContainerError::from)?;
        Ok(())
    }

    async fn start_container(&self, name: &str) -> ToolResult<()> {
        match self
            .docker
            .start_container(name, None::<StartContainerOptions>)
            .await
        {
            Ok(_) => Ok(()),
            // 既に起動中
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(ContainerError::from(e).into()),
        }
    }

    async fn remove_container(&self, name: &str) -> ToolResult<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(ContainerError::from(e).into()),
        }
    }
}
