//! In-memory collaborators for pipeline tests

use crate::error::ToolError;
use crate::provider::{ContainerRuntime, PackageManager, SourceControl, ToolResult};
use crate::readiness::Probe;
use crate::resource::{
    BuildRequest, ContainerSpec, LABEL_FINGERPRINT, ObservedContainer, ObservedNetwork,
    ObservedVolume,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tierflow_core::{HostPackage, NetworkSpec, ServiceEndpoint, VolumeSpec};

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub name: String,
    pub image: String,
    pub image_id: Option<String>,
    pub running: bool,
    pub fingerprint: Option<String>,
    pub network: String,
    pub environment: BTreeMap<String, String>,
}

#[derive(Default)]
struct RuntimeState {
    networks: BTreeMap<String, String>,
    volumes: BTreeSet<String>,
    images: BTreeMap<String, String>,
    build_revisions: BTreeMap<String, u32>,
    containers: BTreeMap<String, FakeContainer>,
    calls: Vec<String>,
    failures: BTreeMap<String, String>,
    unreachable: bool,
}

/// Container runtime backed by maps
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    fn enter(&self, call: &str) -> ToolResult<std::sync::MutexGuard<'_, RuntimeState>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.to_string());
        if let Some(message) = state.failures.get(call) {
            return Err(ToolError::new(message.clone()));
        }
        Ok(state)
    }

    pub fn add_network(&self, name: &str, driver: &str) {
        let mut state = self.state.lock().unwrap();
        state.networks.insert(name.to_string(), driver.to_string());
    }

    pub fn networks(&self) -> Vec<String> {
        self.state.lock().unwrap().networks.keys().cloned().collect()
    }

    pub fn volumes(&self) -> Vec<String> {
        self.state.lock().unwrap().volumes.iter().cloned().collect()
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.state.lock().unwrap().containers.values().cloned().collect()
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.state.lock().unwrap().containers.get(name).cloned()
    }

    pub fn stop_container(&self, name: &str) {
        if let Some(container) = self.state.lock().unwrap().containers.get_mut(name) {
            container.running = false;
        }
    }

    /// Make the next build of `tag` produce a different image id
    pub fn change_build_output(&self, tag: &str) {
        let mut state = self.state.lock().unwrap();
        *state.build_revisions.entry(tag.to_string()).or_default() += 1;
    }

    pub fn fail_on(&self, call: &str, message: &str) {
        let mut state = self.state.lock().unwrap();
        state.failures.insert(call.to_string(), message.to_string());
    }

    pub fn set_unreachable(&self) {
        self.state.lock().unwrap().unreachable = true;
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == call)
            .count()
    }

    /// Calls that change runtime state
    pub fn mutating_calls(&self) -> usize {
        const MUTATING: [&str; 7] = [
            "create_network",
            "create_volume",
            "pull_image",
            "build_image",
            "create_container",
            "start_container",
            "remove_container",
        ];
        MUTATING.iter().map(|c| self.call_count(c)).sum()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> ToolResult<()> {
        let state = self.enter("ping")?;
        if state.unreachable {
            return Err(ToolError::new(
                "Cannot connect to the Docker daemon at unix:///var/run/docker.sock",
            ));
        }
        Ok(())
    }

    async fn inspect_network(&self, name: &str) -> ToolResult<Option<ObservedNetwork>> {
        let state = self.enter("inspect_network")?;
        Ok(state.networks.get(name).map(|driver| ObservedNetwork {
            name: name.to_string(),
            driver: driver.clone(),
        }))
    }

    async fn create_network(&self, spec: &NetworkSpec) -> ToolResult<()> {
        let mut state = self.enter("create_network")?;
        state.networks.insert(spec.name.clone(), spec.driver.clone());
        Ok(())
    }

    async fn inspect_volume(&self, name: &str) -> ToolResult<Option<ObservedVolume>> {
        let state = self.enter("inspect_volume")?;
        Ok(state.volumes.get(name).map(|_| ObservedVolume {
            name: name.to_string(),
            driver: "local".to_string(),
        }))
    }

    async fn create_volume(&self, spec: &VolumeSpec) -> ToolResult<()> {
        let mut state = self.enter("create_volume")?;
        state.volumes.insert(spec.name.clone());
        Ok(())
    }

    async fn image_id(&self, reference: &str) -> ToolResult<Option<String>> {
        let state = self.enter("image_id")?;
        Ok(state.images.get(reference).cloned())
    }

    async fn pull_image(&self, reference: &str) -> ToolResult<()> {
        let mut state = self.enter("pull_image")?;
        state
            .images
            .insert(reference.to_string(), format!("sha256:pulled-{}", reference));
        Ok(())
    }

    async fn build_image(&self, request: &BuildRequest) -> ToolResult<()> {
        let mut state = self.enter("build_image")?;
        let revision = state.build_revisions.get(&request.tag).copied().unwrap_or(0);
        state.images.insert(
            request.tag.clone(),
            format!("sha256:built-{}-{}", request.tag, revision),
        );
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> ToolResult<Option<ObservedContainer>> {
        let state = self.enter("inspect_container")?;
        Ok(state.containers.get(name).map(|c| ObservedContainer {
            id: format!("id-{}", c.name),
            name: c.name.clone(),
            image_id: c.image_id.clone(),
            running: c.running,
            fingerprint: c.fingerprint.clone(),
            networks: vec![c.network.clone()],
        }))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> ToolResult<()> {
        let mut state = self.enter("create_container")?;
        if state.containers.contains_key(&spec.name) {
            return Err(ToolError::new(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        let image_id = state.images.get(&spec.image).cloned();
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                name: spec.name.clone(),
                image: spec.image.clone(),
                image_id,
                running: false,
                fingerprint: spec.labels_with_fingerprint().remove(LABEL_FINGERPRINT),
                network: spec.network.clone(),
                environment: spec.environment.clone(),
            },
        );
        Ok(())
    }

    async fn start_container(&self, name: &str) -> ToolResult<()> {
        let mut state = self.enter("start_container")?;
        match state.containers.get_mut(name) {
            Some(container) => {
                container.running = true;
                Ok(())
            }
            None => Err(ToolError::new(format!("No such container: {}", name))),
        }
    }

    async fn remove_container(&self, name: &str) -> ToolResult<()> {
        let mut state = self.enter("remove_container")?;
        state.containers.remove(name);
        Ok(())
    }
}

/// Source control that writes the branch name into the checkout
#[derive(Default)]
pub struct FakeVcs {
    clones: Mutex<Vec<(String, String, PathBuf)>>,
}

impl FakeVcs {
    pub fn clones(&self) -> Vec<(String, String, PathBuf)> {
        self.clones.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceControl for FakeVcs {
    async fn clone_repository(
        &self,
        repository: &str,
        branch: &str,
        dest: &Path,
    ) -> ToolResult<()> {
        std::fs::create_dir_all(dest).map_err(|e| ToolError::new(e.to_string()))?;
        std::fs::write(dest.join("BRANCH"), branch).map_err(|e| ToolError::new(e.to_string()))?;
        self.clones.lock().unwrap().push((
            repository.to_string(),
            branch.to_string(),
            dest.to_path_buf(),
        ));
        Ok(())
    }
}

/// Package manager with an in-memory install list
#[derive(Default)]
pub struct FakePackages {
    installed: Mutex<BTreeSet<String>>,
    installs: Mutex<Vec<Vec<String>>>,
}

impl FakePackages {
    pub fn mark_installed(&self, name: &str) {
        self.installed.lock().unwrap().insert(name.to_string());
    }

    pub fn install_calls(&self) -> Vec<Vec<String>> {
        self.installs.lock().unwrap().clone()
    }
}

#[async_trait]
impl PackageManager for FakePackages {
    async fn is_installed(&self, package: &HostPackage) -> ToolResult<bool> {
        Ok(self.installed.lock().unwrap().contains(&package.name))
    }

    async fn install(&self, packages: &[HostPackage]) -> ToolResult<()> {
        let names: Vec<String> = packages.iter().map(|p| p.name.clone()).collect();
        self.installed.lock().unwrap().extend(names.iter().cloned());
        self.installs.lock().unwrap().push(names);
        Ok(())
    }
}

/// Probe whose answer is controlled per port
#[derive(Default)]
pub struct FakeProbe {
    down: Mutex<BTreeSet<u16>>,
    probes: Mutex<Vec<u16>>,
}

impl FakeProbe {
    pub fn take_down(&self, port: u16) {
        self.down.lock().unwrap().insert(port);
    }

    pub fn probed_ports(&self) -> Vec<u16> {
        self.probes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Probe for FakeProbe {
    async fn probe(&self, endpoint: &ServiceEndpoint) -> std::io::Result<()> {
        self.probes.lock().unwrap().push(endpoint.port);
        if self.down.lock().unwrap().contains(&endpoint.port) {
            Err(std::io::ErrorKind::ConnectionRefused.into())
        } else {
            Ok(())
        }
    }
}
