//! Idempotent Resource Applier
//!
//! The only component that mutates networks, volumes, containers, images and
//! the source tree. Every method observes the current state, derives an
//! [`Action`] through the pure diff in [`crate::action`], and executes it
//! unless the context is a dry run.

use crate::action::{
    Action, ActionType, plan_container, plan_network, plan_package, plan_source, plan_volume,
};
use crate::error::{PipelineError, Result, ToolError};
use crate::provider::{ContainerRuntime, PackageManager, SourceControl};
use crate::resource::{BuildRequest, ContainerSpec, ObservedSource};
use crate::stage::StageContext;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tierflow_core::{HostPackage, NetworkSpec, SourceConfig, VolumeSpec};
use tracing::{debug, info, instrument};

pub struct ResourceApplier {
    runtime: Arc<dyn ContainerRuntime>,
    vcs: Arc<dyn SourceControl>,
    packages: Arc<dyn PackageManager>,
}

impl ResourceApplier {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        vcs: Arc<dyn SourceControl>,
        packages: Arc<dyn PackageManager>,
    ) -> Self {
        Self {
            runtime,
            vcs,
            packages,
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Install whatever is missing from `packages`
    pub async fn ensure_packages(
        &self,
        ctx: &StageContext,
        packages: &[HostPackage],
    ) -> Result<Vec<Action>> {
        let mut actions = Vec::with_capacity(packages.len());
        let mut missing = Vec::new();

        for package in packages {
            let installed = self
                .packages
                .is_installed(package)
                .await
                .map_err(|e| PipelineError::apply_failure(format!("package {}", package.name), e))?;
            let action = plan_package(installed, package);
            if action.action_type == ActionType::Create {
                missing.push(package.clone());
            }
            actions.push(action);
        }

        if !missing.is_empty() && !ctx.dry_run {
            let names: Vec<&str> = missing.iter().map(|p| p.name.as_str()).collect();
            info!(packages = ?names, "Installing packages");
            self.packages
                .install(&missing)
                .await
                .map_err(|e| PipelineError::apply_failure(format!("packages {}", names.join(", ")), e))?;
        }

        Ok(actions)
    }

    /// Confirm the container runtime answers
    pub async fn check_runtime(&self) -> Result<()> {
        self.runtime
            .ping()
            .await
            .map_err(|e| PipelineError::apply_failure("container runtime", e))
    }

    /// Replace the checkout at `source.dest` with a fresh clone
    #[instrument(skip(self, ctx, source), fields(dest = %source.dest.display()))]
    pub async fn converge_source(&self, ctx: &StageContext, source: &SourceConfig) -> Result<Action> {
        let dest = source.dest.as_path();
        if dest.as_os_str().is_empty() || dest.parent().is_none() {
            return Err(PipelineError::apply_failure(
                "source",
                format!("refusing to use '{}' as checkout directory", dest.display()),
            ));
        }

        let observed = ObservedSource {
            exists: dest.exists(),
        };
        let action = plan_source(observed, source);
        if ctx.dry_run {
            return Ok(action);
        }

        let label = action.resource_label();
        if observed.exists {
            debug!("Removing previous checkout");
            tokio::fs::remove_dir_all(dest)
                .await
                .map_err(|e| PipelineError::apply_failure(&label, e))?;
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::apply_failure(&label, e))?;
        }

        self.vcs
            .clone_repository(&source.repository, &source.branch, dest)
            .await
            .map_err(|e| PipelineError::apply_failure(&label, e))?;

        info!(branch = %source.branch, "Source checked out");
        Ok(action)
    }

    pub async fn converge_network(&self, ctx: &StageContext, spec: &NetworkSpec) -> Result<Action> {
        let label = format!("network {}", spec.name);
        let observed = self
            .runtime
            .inspect_network(&spec.name)
            .await
            .map_err(|e| PipelineError::apply_failure(&label, e))?;

        let action = plan_network(observed.as_ref(), spec);
        match action.action_type {
            ActionType::Conflict => Err(PipelineError::apply_failure(&label, &action.description)),
            ActionType::Create if !ctx.dry_run => {
                self.runtime
                    .create_network(spec)
                    .await
                    .map_err(|e| PipelineError::apply_failure(&label, e))?;
                info!(network = %spec.name, "Network created");
                Ok(action)
            }
            _ => Ok(action),
        }
    }

    pub async fn converge_volume(&self, ctx: &StageContext, spec: &VolumeSpec) -> Result<Action> {
        let label = format!("volume {}", spec.name);
        let observed = self
            .runtime
            .inspect_volume(&spec.name)
            .await
            .map_err(|e| PipelineError::apply_failure(&label, e))?;

        let action = plan_volume(observed.as_ref(), spec);
        if action.action_type == ActionType::Create && !ctx.dry_run {
            self.runtime
                .create_volume(spec)
                .await
                .map_err(|e| PipelineError::apply_failure(&label, e))?;
            info!(volume = %spec.name, "Volume created");
        }
        Ok(action)
    }

    /// Write `KEY=value` lines consumed by the application at build/run time
    pub async fn write_config_file(
        &self,
        ctx: &StageContext,
        path: &Path,
        environment: &BTreeMap<String, String>,
    ) -> Result<Action> {
        let content = render_env_file(environment);
        let id = path.display().to_string();

        let current = tokio::fs::read_to_string(path).await.ok();
        let action = match current {
            None => Action::new(ActionType::Create, "config-file", id, "runtime configuration"),
            Some(existing) if existing == content => {
                Action::new(ActionType::NoOp, "config-file", id, "unchanged")
            }
            Some(_) => Action::new(ActionType::Replace, "config-file", id, "content changed"),
        };

        if action.action_type != ActionType::NoOp && !ctx.dry_run {
            let label = action.resource_label();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| PipelineError::apply_failure(&label, e))?;
            }
            tokio::fs::write(path, content)
                .await
                .map_err(|e| PipelineError::apply_failure(&label, e))?;
        }
        Ok(action)
    }

    /// Build (or pull) the image and return the id it resolves to
    ///
    /// Builds always run; the runtime's layer cache keeps an unchanged
    /// context cheap and yields the same image id.
    pub async fn prepare_image(
        &self,
        ctx: &StageContext,
        reference: &str,
        build: Option<&BuildRequest>,
    ) -> Result<(Action, Option<String>)> {
        let label = format!("image {}", reference);
        let existing = self
            .runtime
            .image_id(reference)
            .await
            .map_err(|e| PipelineError::apply_failure(&label, e))?;

        let action = match (build, &existing) {
            (Some(request), None) => Action::new(
                ActionType::Create,
                "image",
                reference,
                format!("build from {}", request.context.display()),
            ),
            (Some(request), Some(_)) => Action::new(
                ActionType::Replace,
                "image",
                reference,
                format!("rebuild from {}", request.context.display()),
            ),
            (None, None) => Action::new(ActionType::Create, "image", reference, "pull"),
            (None, Some(_)) => Action::new(ActionType::NoOp, "image", reference, "present"),
        };

        if ctx.dry_run || action.action_type == ActionType::NoOp {
            // id of an image that has not been built yet is unknown
            let known = if build.is_some() { None } else { existing };
            return Ok((action, known));
        }

        match build {
            Some(request) => {
                info!(tag = %request.tag, "Building image");
                self.runtime
                    .build_image(request)
                    .await
                    .map_err(|e| PipelineError::apply_failure(&label, e))?;
            }
            None => {
                info!(image = %reference, "Pulling image");
                self.runtime
                    .pull_image(reference)
                    .await
                    .map_err(|e| PipelineError::apply_failure(&label, e))?;
            }
        }

        let image_id = self
            .runtime
            .image_id(reference)
            .await
            .map_err(|e| PipelineError::apply_failure(&label, e))?;
        if image_id.is_none() {
            return Err(PipelineError::apply_failure(
                &label,
                "image is missing after build/pull",
            ));
        }
        Ok((action, image_id))
    }

    /// Converge a container to `spec`, leaving exactly one container by that name
    #[instrument(skip(self, ctx, spec, image_id), fields(container = %spec.name))]
    pub async fn converge_container(
        &self,
        ctx: &StageContext,
        spec: &ContainerSpec,
        image_id: Option<&str>,
    ) -> Result<Action> {
        let label = format!("container {}", spec.name);
        let fail = |e: ToolError| PipelineError::apply_failure(&label, e);

        let observed = self.runtime.inspect_container(&spec.name).await.map_err(fail)?;
        let action = plan_container(observed.as_ref(), spec, image_id);
        debug!(action = %action.action_type, reason = %action.description, "Container diff");

        if ctx.dry_run {
            return Ok(action);
        }

        match action.action_type {
            ActionType::Create => {
                self.runtime.create_container(spec).await.map_err(fail)?;
                self.runtime.start_container(&spec.name).await.map_err(fail)?;
            }
            ActionType::Replace => {
                self.runtime.remove_container(&spec.name).await.map_err(fail)?;
                self.runtime.create_container(spec).await.map_err(fail)?;
                self.runtime.start_container(&spec.name).await.map_err(fail)?;
            }
            ActionType::Start => {
                self.runtime.start_container(&spec.name).await.map_err(fail)?;
            }
            ActionType::NoOp | ActionType::Conflict => {}
        }

        if action.action_type != ActionType::NoOp {
            info!(action = %action.action_type, "Container converged");
        }
        Ok(action)
    }
}

/// Sorted `KEY=value` lines
pub fn render_env_file(environment: &BTreeMap<String, String>) -> String {
    environment
        .iter()
        .map(|(key, value)| format!("{}={}\n", key, value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePackages, FakeRuntime, FakeVcs};
    use tokio_util::sync::CancellationToken;

    fn ctx(dry_run: bool) -> StageContext {
        StageContext::new(dry_run, CancellationToken::new())
    }

    fn applier(runtime: Arc<FakeRuntime>) -> (ResourceApplier, Arc<FakeVcs>, Arc<FakePackages>) {
        let vcs = Arc::new(FakeVcs::default());
        let packages = Arc::new(FakePackages::default());
        (
            ResourceApplier::new(runtime, vcs.clone(), packages.clone()),
            vcs,
            packages,
        )
    }

    fn spec(image: &str) -> ContainerSpec {
        ContainerSpec {
            name: "shop-api".to_string(),
            image: image.to_string(),
            ports: Vec::new(),
            network: "appnet".to_string(),
            environment: BTreeMap::new(),
            secret_digests: BTreeMap::new(),
            mounts: Vec::new(),
            command: None,
            labels: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_network_created_once() {
        let runtime = Arc::new(FakeRuntime::default());
        let (applier, _, _) = applier(runtime.clone());
        let network = NetworkSpec::new("appnet");

        let first = applier.converge_network(&ctx(false), &network).await.unwrap();
        let second = applier.converge_network(&ctx(false), &network).await.unwrap();

        assert_eq!(first.action_type, ActionType::Create);
        assert_eq!(second.action_type, ActionType::NoOp);
        assert_eq!(runtime.networks().len(), 1);
    }

    #[tokio::test]
    async fn test_network_conflict_is_failure() {
        let runtime = Arc::new(FakeRuntime::default());
        runtime.add_network("appnet", "overlay");
        let (applier, _, _) = applier(runtime);

        let err = applier
            .converge_network(&ctx(false), &NetworkSpec::new("appnet"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ResourceApplyFailure { .. }));
    }

    #[tokio::test]
    async fn test_dry_run_does_not_mutate() {
        let runtime = Arc::new(FakeRuntime::default());
        let (applier, _, _) = applier(runtime.clone());

        let action = applier
            .converge_network(&ctx(true), &NetworkSpec::new("appnet"))
            .await
            .unwrap();
        assert_eq!(action.action_type, ActionType::Create);
        assert!(runtime.networks().is_empty());

        applier
            .converge_container(&ctx(true), &spec("shop-api:v1"), None)
            .await
            .unwrap();
        assert!(runtime.containers().is_empty());
    }

    #[tokio::test]
    async fn test_volume_survives_reapply() {
        let runtime = Arc::new(FakeRuntime::default());
        let (applier, _, _) = applier(runtime.clone());
        let volume = VolumeSpec::new("mongo-data");

        applier.converge_volume(&ctx(false), &volume).await.unwrap();
        let again = applier.converge_volume(&ctx(false), &volume).await.unwrap();
        assert_eq!(again.action_type, ActionType::NoOp);
        assert_eq!(runtime.volumes(), vec!["mongo-data".to_string()]);
    }

    #[tokio::test]
    async fn test_changed_image_replaces_container() {
        let runtime = Arc::new(FakeRuntime::default());
        let (applier, _, _) = applier(runtime.clone());

        applier
            .converge_container(&ctx(false), &spec("shop-api:v1"), Some("sha256:1"))
            .await
            .unwrap();
        let action = applier
            .converge_container(&ctx(false), &spec("shop-api:v2"), Some("sha256:2"))
            .await
            .unwrap();

        assert_eq!(action.action_type, ActionType::Replace);
        let containers = runtime.containers();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].image, "shop-api:v2");
        assert!(containers[0].running);
    }

    #[tokio::test]
    async fn test_unchanged_container_is_noop() {
        let runtime = Arc::new(FakeRuntime::default());
        let (applier, _, _) = applier(runtime.clone());

        applier
            .converge_container(&ctx(false), &spec("shop-api:v1"), Some("sha256:1"))
            .await
            .unwrap();
        let action = applier
            .converge_container(&ctx(false), &spec("shop-api:v1"), Some("sha256:1"))
            .await
            .unwrap();
        assert_eq!(action.action_type, ActionType::NoOp);
        assert_eq!(runtime.call_count("create_container"), 1);
    }

    #[tokio::test]
    async fn test_stopped_container_is_started() {
        let runtime = Arc::new(FakeRuntime::default());
        let (applier, _, _) = applier(runtime.clone());
        let desired = spec("shop-api:v1");

        applier
            .converge_container(&ctx(false), &desired, Some("sha256:1"))
            .await
            .unwrap();
        runtime.stop_container("shop-api");

        let action = applier
            .converge_container(&ctx(false), &desired, Some("sha256:1"))
            .await
            .unwrap();
        assert_eq!(action.action_type, ActionType::Start);
        assert!(runtime.containers()[0].running);
    }

    #[tokio::test]
    async fn test_source_replaced_with_second_branch() {
        let temp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::default());
        let (applier, vcs, _) = applier(runtime);

        let mut source = SourceConfig::new("https://example.com/shop.git", temp.path().join("app"));
        source.branch = "main".to_string();
        let first = applier.converge_source(&ctx(false), &source).await.unwrap();
        assert_eq!(first.action_type, ActionType::Create);
        std::fs::write(temp.path().join("app/stale.txt"), "left over").unwrap();

        source.branch = "release".to_string();
        let second = applier.converge_source(&ctx(false), &source).await.unwrap();
        assert_eq!(second.action_type, ActionType::Replace);

        // nothing from the previous checkout survives
        assert!(!temp.path().join("app/stale.txt").exists());
        let branch = std::fs::read_to_string(temp.path().join("app/BRANCH")).unwrap();
        assert_eq!(branch, "release");
        assert_eq!(vcs.clones().len(), 2);
    }

    #[tokio::test]
    async fn test_source_refuses_root() {
        let runtime = Arc::new(FakeRuntime::default());
        let (applier, _, _) = applier(runtime);
        let source = SourceConfig::new("https://example.com/shop.git", "/");
        assert!(applier.converge_source(&ctx(false), &source).await.is_err());
    }

    #[tokio::test]
    async fn test_packages_installed_only_when_missing() {
        let runtime = Arc::new(FakeRuntime::default());
        let (applier, _, packages) = applier(runtime);
        packages.mark_installed("git");

        let wanted = vec![
            HostPackage::new("docker.io", Some("docker"), tierflow_core::PackageRole::Runtime),
            HostPackage::new("git", Some("git"), tierflow_core::PackageRole::Vcs),
        ];
        let actions = applier.ensure_packages(&ctx(false), &wanted).await.unwrap();
        assert_eq!(actions[0].action_type, ActionType::Create);
        assert_eq!(actions[1].action_type, ActionType::NoOp);
        assert_eq!(packages.install_calls(), vec![vec!["docker.io".to_string()]]);

        let again = applier.ensure_packages(&ctx(false), &wanted).await.unwrap();
        assert!(again.iter().all(|a| a.action_type == ActionType::NoOp));
        assert_eq!(packages.install_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_tool_error_is_surfaced_unmodified() {
        let runtime = Arc::new(FakeRuntime::default());
        runtime.fail_on("create_network", "permission denied while trying to connect");
        let (applier, _, _) = applier(runtime);

        let err = applier
            .converge_network(&ctx(false), &NetworkSpec::new("appnet"))
            .await
            .unwrap_err();
        match err {
            PipelineError::ResourceApplyFailure { resource, message } => {
                assert_eq!(resource, "network appnet");
                assert_eq!(message, "permission denied while trying to connect");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_config_file_written_once() {
        let temp = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::default());
        let (applier, _, _) = applier(runtime);
        let path = temp.path().join("backend/.env");

        let mut env = BTreeMap::new();
        env.insert("MONGO_URI".to_string(), "mongodb://shop-db:27017/shop".to_string());
        env.insert("A".to_string(), "1".to_string());

        let first = applier.write_config_file(&ctx(false), &path, &env).await.unwrap();
        assert_eq!(first.action_type, ActionType::Create);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "A=1\nMONGO_URI=mongodb://shop-db:27017/shop\n"
        );

        let second = applier.write_config_file(&ctx(false), &path, &env).await.unwrap();
        assert_eq!(second.action_type, ActionType::NoOp);
    }

    #[tokio::test]
    async fn test_prepare_image_build() {
        let runtime = Arc::new(FakeRuntime::default());
        let (applier, _, _) = applier(runtime.clone());
        let request = BuildRequest {
            context: "/opt/shop/backend".into(),
            dockerfile: None,
            tag: "shop-api:latest".to_string(),
            args: BTreeMap::new(),
        };

        let (action, id) = applier
            .prepare_image(&ctx(false), "shop-api:latest", Some(&request))
            .await
            .unwrap();
        assert_eq!(action.action_type, ActionType::Create);
        assert!(id.is_some());
        assert_eq!(runtime.call_count("build_image"), 1);

        let (planned, planned_id) = applier
            .prepare_image(&ctx(true), "shop-api:latest", Some(&request))
            .await
            .unwrap();
        assert_eq!(planned.action_type, ActionType::Replace);
        assert!(planned_id.is_none());
        assert_eq!(runtime.call_count("build_image"), 1);
    }

    #[tokio::test]
    async fn test_prepare_image_pull_when_missing() {
        let runtime = Arc::new(FakeRuntime::default());
        let (applier, _, _) = applier(runtime.clone());

        let (action, id) = applier
            .prepare_image(&ctx(false), "mongo:6", None)
            .await
            .unwrap();
        assert_eq!(action.action_type, ActionType::Create);
        assert!(id.is_some());

        let (again, _) = applier
            .prepare_image(&ctx(false), "mongo:6", None)
            .await
            .unwrap();
        assert_eq!(again.action_type, ActionType::NoOp);
        assert_eq!(runtime.call_count("pull_image"), 1);
    }
}
