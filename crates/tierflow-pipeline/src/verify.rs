//! Post-deployment verification
//!
//! Inspects what a deployment should have produced and reports anything
//! missing or unreachable. Findings are advisory; nothing here fails a run.

use crate::provider::ContainerRuntime;
use crate::readiness::ReadinessGate;
use std::sync::Arc;
use tierflow_core::{Deployment, ServiceRole};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationWarning {
    /// What was checked, e.g. "container shop-api"
    pub subject: String,
    pub message: String,
}

impl std::fmt::Display for VerificationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.subject, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    pub passed: Vec<String>,
    pub warnings: Vec<VerificationWarning>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    fn pass(&mut self, subject: impl Into<String>) {
        self.passed.push(subject.into());
    }

    fn warn(&mut self, subject: impl Into<String>, message: impl Into<String>) {
        let warning = VerificationWarning {
            subject: subject.into(),
            message: message.into(),
        };
        warn!("{}", warning);
        self.warnings.push(warning);
    }
}

pub struct Verifier {
    runtime: Arc<dyn ContainerRuntime>,
    gate: ReadinessGate,
}

impl Verifier {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, gate: ReadinessGate) -> Self {
        Self { runtime, gate }
    }

    pub async fn verify(&self, deployment: &Deployment) -> VerificationReport {
        let mut report = VerificationReport::default();

        let network = &deployment.network.name;
        let network_subject = format!("network {}", network);
        match self.runtime.inspect_network(network).await {
            Ok(Some(_)) => report.pass(network_subject),
            Ok(None) => report.warn(network_subject, "does not exist"),
            Err(e) => report.warn(network_subject, e.to_string()),
        }

        for volume in &deployment.volumes {
            let subject = format!("volume {}", volume.name);
            match self.runtime.inspect_volume(&volume.name).await {
                Ok(Some(_)) => report.pass(subject),
                Ok(None) => report.warn(subject, "does not exist"),
                Err(e) => report.warn(subject, e.to_string()),
            }
        }

        for role in ServiceRole::ALL {
            let Ok((name, service)) = deployment.service_by_role(role) else {
                continue;
            };
            let container = deployment.container_name(name);
            let subject = format!("container {}", container);

            match self.runtime.inspect_container(&container).await {
                Ok(Some(observed)) if !observed.running => report.warn(subject, "is not running"),
                Ok(Some(observed)) if !observed.networks.iter().any(|n| n == network) => {
                    report.warn(subject, format!("is not attached to network {}", network))
                }
                Ok(Some(_)) => report.pass(subject),
                Ok(None) => report.warn(subject, "does not exist"),
                Err(e) => report.warn(subject, e.to_string()),
            }

            if let Some((endpoint, _)) = service.readiness_target() {
                let subject = format!("{} endpoint {}", role, endpoint);
                match self.gate.check_once(&endpoint).await {
                    Ok(()) => report.pass(subject),
                    Err(e) => report.warn(subject, format!("not reachable ({})", e)),
                }
            }
        }

        report
    }
}
