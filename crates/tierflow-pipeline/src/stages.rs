//! Concrete stages of a three-tier deployment

use crate::applier::ResourceApplier;
use crate::error::{PipelineError, Result};
use crate::readiness::ReadinessTarget;
use crate::resource::{BuildRequest, ContainerSpec, LABEL_PROJECT, LABEL_ROLE, LABEL_SERVICE};
use crate::stage::{Stage, StageContext, StageDescriptor, StageId, StageOutput};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tierflow_core::vault::{is_vault_reference, reference_name};
use tierflow_core::{
    Deployment, PackageRole, Service, ServiceRole, SourceConfig, TierError, Vault, VolumeSpec,
    expand_placeholders,
};
use tracing::{debug, warn};

/// Descriptors for a deployment, service stages tagged with their service name
pub fn stage_descriptors(deployment: &Deployment) -> Vec<StageDescriptor> {
    StageId::ALL
        .into_iter()
        .map(|id| {
            let descriptor = StageDescriptor::new(id);
            match role_of(id).and_then(|role| deployment.service_by_role(role).ok()) {
                Some((name, _)) => descriptor.with_tag(name),
                None => descriptor,
            }
        })
        .collect()
}

fn role_of(id: StageId) -> Option<ServiceRole> {
    match id {
        StageId::Database => Some(ServiceRole::Database),
        StageId::Api => Some(ServiceRole::Api),
        StageId::Frontend => Some(ServiceRole::Frontend),
        _ => None,
    }
}

/// Build the six stages for a validated deployment
///
/// Relative paths in the deployment (the checkout directory) are resolved
/// against `project_root`.
pub fn build_stages(
    deployment: Arc<Deployment>,
    project_root: &Path,
    applier: Arc<ResourceApplier>,
    vault: Option<Arc<Vault>>,
) -> Result<Vec<Arc<dyn Stage>>> {
    let source = deployment.source.clone().map(|mut source| {
        if source.dest.is_relative() {
            source.dest = project_root.join(&source.dest);
        }
        source
    });
    let source_dest = source.as_ref().map(|s| s.dest.clone());

    let mut stages: Vec<Arc<dyn Stage>> = Vec::with_capacity(StageId::ALL.len());
    for descriptor in stage_descriptors(&deployment) {
        let stage: Arc<dyn Stage> = match descriptor.id {
            StageId::HostBootstrap => Arc::new(HostBootstrapStage {
                descriptor,
                deployment: deployment.clone(),
                applier: applier.clone(),
            }),
            StageId::SourceAcquisition => Arc::new(SourceStage {
                descriptor,
                deployment: deployment.clone(),
                source: source.clone(),
                applier: applier.clone(),
            }),
            StageId::NetworkProvisioning => Arc::new(NetworkStage {
                descriptor,
                deployment: deployment.clone(),
                applier: applier.clone(),
            }),
            id => {
                let role = role_of(id).ok_or_else(|| {
                    PipelineError::Config(TierError::InvalidConfig(format!(
                        "stage '{}' has no service role",
                        id
                    )))
                })?;
                let (name, _) = deployment.service_by_role(role)?;
                Arc::new(ServiceStage {
                    descriptor,
                    service_name: name.to_string(),
                    role,
                    deployment: deployment.clone(),
                    source_dest: source_dest.clone(),
                    applier: applier.clone(),
                    vault: vault.clone(),
                })
            }
        };
        stages.push(stage);
    }
    Ok(stages)
}

/// Container runtime installed and reachable
struct HostBootstrapStage {
    descriptor: StageDescriptor,
    deployment: Arc<Deployment>,
    applier: Arc<ResourceApplier>,
}

#[async_trait]
impl Stage for HostBootstrapStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn apply(&self, ctx: &StageContext) -> Result<StageOutput> {
        let mut output = StageOutput::default();
        let packages: Vec<_> = self
            .deployment
            .host
            .packages_for(PackageRole::Runtime)
            .into_iter()
            .cloned()
            .collect();

        let actions = self.applier.ensure_packages(ctx, &packages).await?;
        let pending_install = actions.iter().any(|a| a.action_type.is_change());
        output.actions.extend(actions);

        if ctx.dry_run && pending_install {
            output.note("runtime reachability is checked after installation");
        } else {
            self.applier.check_runtime().await?;
            output.note("container runtime reachable");
        }
        Ok(output)
    }
}

/// Application source checked out at the requested branch
struct SourceStage {
    descriptor: StageDescriptor,
    deployment: Arc<Deployment>,
    source: Option<SourceConfig>,
    applier: Arc<ResourceApplier>,
}

#[async_trait]
impl Stage for SourceStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn apply(&self, ctx: &StageContext) -> Result<StageOutput> {
        let mut output = StageOutput::default();

        let Some(source) = &self.source else {
            output.note("no source declared; images are used as published");
            return Ok(output);
        };

        let packages: Vec<_> = self
            .deployment
            .host
            .packages_for(PackageRole::Vcs)
            .into_iter()
            .cloned()
            .collect();
        output
            .actions
            .extend(self.applier.ensure_packages(ctx, &packages).await?);
        output.push(self.applier.converge_source(ctx, source).await?);
        Ok(output)
    }
}

struct NetworkStage {
    descriptor: StageDescriptor,
    deployment: Arc<Deployment>,
    applier: Arc<ResourceApplier>,
}

#[async_trait]
impl Stage for NetworkStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn apply(&self, ctx: &StageContext) -> Result<StageOutput> {
        let mut output = StageOutput::default();
        output.push(
            self.applier
                .converge_network(ctx, &self.deployment.network)
                .await?,
        );
        Ok(output)
    }
}

/// One service container (database, api or frontend)
struct ServiceStage {
    descriptor: StageDescriptor,
    service_name: String,
    role: ServiceRole,
    deployment: Arc<Deployment>,
    source_dest: Option<PathBuf>,
    applier: Arc<ResourceApplier>,
    vault: Option<Arc<Vault>>,
}

/// Resolved environment plus the digests of the secrets inside it
struct ResolvedEnvironment {
    values: BTreeMap<String, String>,
    secret_digests: BTreeMap<String, String>,
}

impl ServiceStage {
    fn service(&self) -> Result<&Service> {
        self.deployment
            .services
            .get(&self.service_name)
            .ok_or_else(|| TierError::ServiceNotFound(self.service_name.clone()).into())
    }

    /// Volumes this stage converges
    ///
    /// The database stage owns every declared volume; other services only
    /// make sure the ones they mount exist.
    fn volumes(&self, service: &Service) -> Vec<VolumeSpec> {
        self.deployment
            .volumes
            .iter()
            .filter(|v| {
                self.role == ServiceRole::Database
                    || service.mounts.iter().any(|m| m.volume == v.name)
            })
            .cloned()
            .collect()
    }

    /// Expand `${...}` placeholders and unseal `vault://` references
    ///
    /// In a dry run secrets stay sealed; their digest still feeds the
    /// fingerprint, so planning needs no plaintext.
    fn resolve_environment(
        &self,
        service: &Service,
        scope: &BTreeMap<String, String>,
        dry_run: bool,
    ) -> Result<ResolvedEnvironment> {
        let mut values = BTreeMap::new();
        let mut secret_digests = BTreeMap::new();

        for (key, raw) in &service.environment {
            let value = expand_placeholders(raw, scope);
            let Some(name) = reference_name(&value) else {
                if is_vault_reference(&value) {
                    return Err(TierError::Vault(format!("{} has an empty vault reference", key)).into());
                }
                values.insert(key.clone(), value);
                continue;
            };

            let resolved = match &self.vault {
                Some(vault) => {
                    secret_digests.insert(key.clone(), vault.digest(name)?);
                    if dry_run { value.clone() } else { vault.get(name)? }
                }
                None if dry_run => {
                    warn!(key = %key, "Vault key unavailable; planning with the sealed reference");
                    value.clone()
                }
                None => return Err(TierError::VaultKeyMissing.into()),
            };
            values.insert(key.clone(), resolved);
        }

        Ok(ResolvedEnvironment {
            values,
            secret_digests,
        })
    }

    fn source_path(&self, relative: Option<&Path>) -> Result<PathBuf> {
        let root = self.source_dest.as_ref().ok_or_else(|| {
            TierError::InvalidConfig(format!(
                "service '{}' needs a source block to build or write configuration",
                self.service_name
            ))
        })?;
        Ok(match relative {
            Some(path) => root.join(path),
            None => root.clone(),
        })
    }

    fn build_request(
        &self,
        service: &Service,
        reference: &str,
        scope: &BTreeMap<String, String>,
    ) -> Result<Option<BuildRequest>> {
        let Some(build) = &service.build else {
            return Ok(None);
        };
        Ok(Some(BuildRequest {
            context: self.source_path(build.context.as_deref())?,
            dockerfile: build.dockerfile.clone(),
            tag: reference.to_string(),
            args: build
                .args
                .iter()
                .map(|(k, v)| (k.clone(), expand_placeholders(v, scope)))
                .collect(),
        }))
    }
}

#[async_trait]
impl Stage for ServiceStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn apply(&self, ctx: &StageContext) -> Result<StageOutput> {
        let mut output = StageOutput::default();
        let service = self.service()?;
        let scope = self.deployment.placeholder_scope();

        for volume in self.volumes(service) {
            output.push(self.applier.converge_volume(ctx, &volume).await?);
        }

        let environment = self.resolve_environment(service, &scope, ctx.dry_run)?;

        if let Some(config_file) = &service.config_file {
            let path = self.source_path(Some(config_file))?;
            output.push(
                self.applier
                    .write_config_file(ctx, &path, &environment.values)
                    .await?,
            );
        }

        let reference = self.deployment.image_ref(&self.service_name)?;
        let build = self.build_request(service, &reference, &scope)?;
        let (image_action, image_id) = self
            .applier
            .prepare_image(ctx, &reference, build.as_ref())
            .await?;
        output.push(image_action);

        let mut labels = BTreeMap::new();
        labels.insert(LABEL_PROJECT.to_string(), self.deployment.name.clone());
        labels.insert(LABEL_SERVICE.to_string(), self.service_name.clone());
        labels.insert(LABEL_ROLE.to_string(), self.role.to_string());

        let spec = ContainerSpec {
            name: self.deployment.container_name(&self.service_name),
            image: reference,
            ports: service.ports.clone(),
            network: self.deployment.network.name.clone(),
            environment: environment.values,
            secret_digests: environment.secret_digests,
            mounts: service.mounts.clone(),
            command: service
                .command
                .as_deref()
                .map(|c| expand_placeholders(c, &scope)),
            labels,
        };
        debug!(container = %spec.name, fingerprint = %spec.fingerprint(), "Desired container");

        output.push(
            self.applier
                .converge_container(ctx, &spec, image_id.as_deref())
                .await?,
        );

        if let Some(port) = service.primary_host_port() {
            output.note(format!("{} published on port {}", self.service_name, port));
        }
        Ok(output)
    }

    fn readiness(&self) -> Option<ReadinessTarget> {
        let service = self.deployment.services.get(&self.service_name)?;
        service
            .readiness_target()
            .map(|(endpoint, policy)| ReadinessTarget::new(endpoint, policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionType;
    use crate::ledger::Ledger;
    use crate::readiness::ReadinessGate;
    use crate::selector::{Selection, StageSelector};
    use crate::sequencer::{RunReport, Sequencer, StageOutcome};
    use crate::testing::{FakePackages, FakeProbe, FakeRuntime, FakeVcs};
    use tierflow_core::{VaultKey, load_deployment_str};

    const SHOP: &str = r#"
project "shop"

source repository="https://example.com/shop.git" dest="checkout"

network "appnet"
volume "mongo-data"

service "mongodb" role="database" {
    image "mongo:6"
    port 27017
    mount volume="mongo-data" path="/data/db"
}

service "api" role="api" {
    build context="backend"
    port 5000
    env {
        MONGO_URI "mongodb://${database.host}:${database.container_port}/shop"
        JWT_SECRET "vault://jwt-secret"
    }
    config_file "backend/.env"
}

service "web" role="frontend" {
    build context="frontend"
    port 3000
    env {
        API_URL "http://localhost:${api.port}"
    }
}
"#;

    struct Harness {
        _temp: tempfile::TempDir,
        root: PathBuf,
        deployment: Arc<Deployment>,
        runtime: Arc<FakeRuntime>,
        vcs: Arc<FakeVcs>,
        packages: Arc<FakePackages>,
        probe: Arc<FakeProbe>,
        vault: Arc<Vault>,
    }

    impl Harness {
        fn new(config: &str) -> Self {
            let temp = tempfile::tempdir().unwrap();
            let root = temp.path().to_path_buf();
            let deployment = Arc::new(load_deployment_str(config, &root).unwrap());

            let mut vault = Vault::open(root.join("secrets.vault"), VaultKey::generate()).unwrap();
            vault.set("jwt-secret", "s3cr3t").unwrap();

            Self {
                _temp: temp,
                root,
                deployment,
                runtime: Arc::new(FakeRuntime::default()),
                vcs: Arc::new(FakeVcs::default()),
                packages: Arc::new(FakePackages::default()),
                probe: Arc::new(FakeProbe::default()),
                vault: Arc::new(vault),
            }
        }

        fn stages(&self) -> Vec<Arc<dyn Stage>> {
            let applier = Arc::new(ResourceApplier::new(
                self.runtime.clone(),
                self.vcs.clone(),
                self.packages.clone(),
            ));
            build_stages(
                self.deployment.clone(),
                &self.root,
                applier,
                Some(self.vault.clone()),
            )
            .unwrap()
        }

        fn select(&self, only: &[&str]) -> Selection {
            let descriptors = stage_descriptors(&self.deployment);
            StageSelector::new(only.iter().map(|s| s.to_string()).collect(), Vec::new())
                .resolve(&descriptors)
                .unwrap()
        }

        async fn run(&self, selection: &Selection, ledger: &mut Ledger, dry_run: bool) -> RunReport {
            Sequencer::new(ReadinessGate::new(self.probe.clone()))
                .run(&self.stages(), selection, ledger, dry_run)
                .await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_host_full_run() {
        let harness = Harness::new(SHOP);
        let mut ledger = Ledger::in_memory();

        let report = harness.run(&harness.select(&[]), &mut ledger, false).await;
        assert!(report.is_success(), "{:?}", report.first_failed());

        assert_eq!(harness.runtime.networks(), vec!["appnet".to_string()]);
        assert_eq!(harness.runtime.volumes(), vec!["mongo-data".to_string()]);
        assert_eq!(
            harness.packages.install_calls(),
            vec![vec!["docker.io".to_string()], vec!["git".to_string()]]
        );
        assert_eq!(harness.vcs.clones()[0].2, harness.root.join("checkout"));

        let containers = harness.runtime.containers();
        assert_eq!(containers.len(), 3);
        assert!(containers.iter().all(|c| c.running && c.network == "appnet"));

        let api = harness.runtime.container("shop-api").unwrap();
        assert_eq!(api.environment["MONGO_URI"], "mongodb://shop-mongodb:27017/shop");
        assert_eq!(api.environment["JWT_SECRET"], "s3cr3t");
        let web = harness.runtime.container("shop-web").unwrap();
        assert_eq!(web.environment["API_URL"], "http://localhost:5000");

        let env_file =
            std::fs::read_to_string(harness.root.join("checkout/backend/.env")).unwrap();
        assert!(env_file.contains("JWT_SECRET=s3cr3t\n"));

        assert_eq!(harness.probe.probed_ports(), vec![27017, 5000, 3000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_converges_without_container_changes() {
        let harness = Harness::new(SHOP);
        let mut ledger = Ledger::in_memory();
        harness.run(&harness.select(&[]), &mut ledger, false).await;
        let creates = harness.runtime.call_count("create_container");

        let report = harness
            .run(&harness.select(&["network", "database", "api", "frontend"]), &mut ledger, false)
            .await;
        assert!(report.is_success());

        let plan = report.plan();
        let containers: Vec<_> = plan
            .actions
            .iter()
            .filter(|a| a.resource_type == "container")
            .collect();
        assert_eq!(containers.len(), 3);
        assert!(containers.iter().all(|a| a.action_type == ActionType::NoOp));
        assert_eq!(harness.runtime.call_count("create_container"), creates);
        assert_eq!(harness.runtime.call_count("remove_container"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_full_run_keeps_containers() {
        let harness = Harness::new(SHOP);
        let mut ledger = Ledger::in_memory();
        let first = harness.run(&harness.select(&[]), &mut ledger, false).await;
        assert!(first.is_success(), "{:?}", first.first_failed());
        let creates = harness.runtime.call_count("create_container");
        let starts = harness.runtime.call_count("start_container");

        // source, config file and images are refreshed, containers are left alone
        let second = harness.run(&harness.select(&[]), &mut ledger, false).await;
        assert!(second.is_success(), "{:?}", second.first_failed());

        let plan = second.plan();
        let containers: Vec<_> = plan
            .actions
            .iter()
            .filter(|a| a.resource_type == "container")
            .collect();
        assert_eq!(containers.len(), 3);
        assert!(
            containers.iter().all(|a| a.action_type == ActionType::NoOp),
            "{:?}",
            containers
        );
        assert_eq!(harness.runtime.call_count("create_container"), creates);
        assert_eq!(harness.runtime.call_count("start_container"), starts);
        assert_eq!(harness.runtime.call_count("remove_container"), 0);

        let running = harness.runtime.containers();
        assert_eq!(running.len(), 3);
        assert!(running.iter().all(|c| c.running));
        assert_eq!(harness.runtime.networks(), vec!["appnet".to_string()]);
        assert_eq!(harness.runtime.volumes(), vec!["mongo-data".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuilt_image_replaces_only_that_container() {
        let harness = Harness::new(SHOP);
        let mut ledger = Ledger::in_memory();
        harness.run(&harness.select(&[]), &mut ledger, false).await;

        harness.runtime.change_build_output("shop-api:latest");
        let report = harness.run(&harness.select(&["api"]), &mut ledger, false).await;
        assert!(report.is_success(), "{:?}", report.first_failed());

        assert!(matches!(
            report.outcome_of(StageId::Database),
            Some(StageOutcome::Skipped)
        ));
        let replaced = report.plan().actions_by_type(ActionType::Replace).len();
        // the image rebuild plus the api container
        assert_eq!(replaced, 2);
        assert_eq!(harness.runtime.call_count("remove_container"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_run_needs_history() {
        let harness = Harness::new(SHOP);
        let mut ledger = Ledger::in_memory();

        let report = harness.run(&harness.select(&["api"]), &mut ledger, false).await;
        assert!(!report.is_success());
        assert_eq!(harness.runtime.mutating_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_mutates_nothing() {
        let harness = Harness::new(SHOP);
        let mut ledger = Ledger::in_memory();

        let report = harness.run(&harness.select(&[]), &mut ledger, true).await;
        assert!(report.is_success(), "{:?}", report.first_failed());

        assert_eq!(harness.runtime.mutating_calls(), 0);
        assert!(harness.packages.install_calls().is_empty());
        assert!(harness.vcs.clones().is_empty());
        assert!(!harness.root.join("checkout").exists());

        let summary = report.plan().summary();
        assert!(summary.create > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_after_apply_reports_no_container_changes() {
        let harness = Harness::new(SHOP);
        let mut ledger = Ledger::in_memory();
        harness.run(&harness.select(&[]), &mut ledger, false).await;

        let report = harness
            .run(&harness.select(&["database", "api", "frontend"]), &mut ledger, true)
            .await;
        let plan = report.plan();
        assert!(
            plan.actions
                .iter()
                .filter(|a| a.resource_type == "container")
                .all(|a| a.action_type == ActionType::NoOp),
            "{:?}",
            plan.actions
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_runtime_failure_names_stage() {
        let harness = Harness::new(SHOP);
        harness.runtime.set_unreachable();
        let mut ledger = Ledger::in_memory();

        let report = harness.run(&harness.select(&[]), &mut ledger, false).await;
        let (stage, error) = report.first_failed().unwrap();
        assert_eq!(stage.id, StageId::HostBootstrap);
        assert!(error.to_string().contains("Cannot connect to the Docker daemon"));
        assert!(report.last_completed().is_none());
    }

    #[test]
    fn test_service_names_are_tags() {
        let harness = Harness::new(SHOP);
        let selection = harness.select(&["mongodb", "web"]);
        assert_eq!(
            selection.ids().collect::<Vec<_>>(),
            vec![StageId::Database, StageId::Frontend]
        );
    }
}
