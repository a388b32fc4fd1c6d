//! Desired-state diff
//!
//! Each `plan_*` function is a pure `(observed, desired) -> Action` mapping.
//! The applier executes the resulting action; nothing here touches the host.

use crate::resource::{ContainerSpec, ObservedContainer, ObservedNetwork, ObservedSource, ObservedVolume};
use serde::{Deserialize, Serialize};
use tierflow_core::{HostPackage, NetworkSpec, SourceConfig, VolumeSpec};

/// A planned or executed change to one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub action_type: ActionType,
    /// Resource kind (e.g., "network", "volume", "container", "source", "package", "image")
    pub resource_type: String,
    pub resource_id: String,
    pub description: String,
}

impl Action {
    pub fn new(
        action_type: ActionType,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            action_type,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            description: description.into(),
        }
    }

    /// "network appnet" style label used in errors and reports
    pub fn resource_label(&self) -> String {
        format!("{} {}", self.resource_type, self.resource_id)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:<8} {} ({})",
            self.action_type,
            self.resource_label(),
            self.description
        )
    }
}

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Resource is absent and will be created
    Create,
    /// Resource exists but diverges; remove and recreate
    Replace,
    /// Container matches the spec but is stopped
    Start,
    /// Already converged
    NoOp,
    /// Exists with an incompatible configuration that cannot be replaced safely
    Conflict,
}

impl ActionType {
    /// Anything other than a no-op
    pub fn is_change(&self) -> bool {
        !matches!(self, ActionType::NoOp)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Replace => write!(f, "replace"),
            ActionType::Start => write!(f, "start"),
            ActionType::NoOp => write!(f, "no-op"),
            ActionType::Conflict => write!(f, "conflict"),
        }
    }
}

pub fn plan_network(observed: Option<&ObservedNetwork>, desired: &NetworkSpec) -> Action {
    match observed {
        None => Action::new(
            ActionType::Create,
            "network",
            &desired.name,
            format!("driver {}", desired.driver),
        ),
        Some(network) if network.driver == desired.driver => Action::new(
            ActionType::NoOp,
            "network",
            &desired.name,
            "already present",
        ),
        // Containers of other projects may be attached; never replace a network
        Some(network) => Action::new(
            ActionType::Conflict,
            "network",
            &desired.name,
            format!(
                "exists with driver '{}', expected '{}'",
                network.driver, desired.driver
            ),
        ),
    }
}

/// Volumes are created once and never destroyed by an apply
pub fn plan_volume(observed: Option<&ObservedVolume>, desired: &VolumeSpec) -> Action {
    match observed {
        None => Action::new(
            ActionType::Create,
            "volume",
            &desired.name,
            format!("driver {}", desired.driver),
        ),
        Some(volume) if volume.driver != desired.driver => Action::new(
            ActionType::NoOp,
            "volume",
            &desired.name,
            format!(
                "kept as-is (driver '{}' differs from '{}')",
                volume.driver, desired.driver
            ),
        ),
        Some(_) => Action::new(ActionType::NoOp, "volume", &desired.name, "already present"),
    }
}

/// A checkout is always fetched fresh; an existing tree is removed first
pub fn plan_source(observed: ObservedSource, desired: &SourceConfig) -> Action {
    let id = desired.dest.display().to_string();
    let description = format!("{} ({})", desired.repository, desired.branch);
    if observed.exists {
        Action::new(ActionType::Replace, "source", id, description)
    } else {
        Action::new(ActionType::Create, "source", id, description)
    }
}

pub fn plan_package(installed: bool, package: &HostPackage) -> Action {
    if installed {
        Action::new(ActionType::NoOp, "package", &package.name, "installed")
    } else {
        Action::new(
            ActionType::Create,
            "package",
            &package.name,
            format!("'{}' not found on PATH", package.probe_command()),
        )
    }
}

/// Container convergence
///
/// * absent → create
/// * same fingerprint and image id → no-op when running, start when stopped
/// * anything else → replace (remove, then create with the same name)
///
/// `desired_image_id` is the id the image reference resolves to right now;
/// `None` means it is not known yet (for instance a build that has not run
/// in a dry run), which is treated as unchanged.
pub fn plan_container(
    observed: Option<&ObservedContainer>,
    desired: &ContainerSpec,
    desired_image_id: Option<&str>,
) -> Action {
    let Some(container) = observed else {
        return Action::new(
            ActionType::Create,
            "container",
            &desired.name,
            format!("image {}", desired.image),
        );
    };

    let fingerprint = desired.fingerprint();
    if container.fingerprint.as_deref() != Some(fingerprint.as_str()) {
        return Action::new(
            ActionType::Replace,
            "container",
            &desired.name,
            "spec changed",
        );
    }

    if let (Some(current), Some(wanted)) = (container.image_id.as_deref(), desired_image_id) {
        if current != wanted {
            return Action::new(
                ActionType::Replace,
                "container",
                &desired.name,
                "image rebuilt",
            );
        }
    }

    if container.running {
        Action::new(ActionType::NoOp, "container", &desired.name, "up to date")
    } else {
        Action::new(ActionType::Start, "container", &desired.name, "stopped")
    }
}

/// Plan containing all actions of one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<Action>,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    pub fn has_changes(&self) -> bool {
        self.actions.iter().any(|a| a.action_type.is_change())
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            replace: self.actions_by_type(ActionType::Replace).len(),
            start: self.actions_by_type(ActionType::Start).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
            conflict: self.actions_by_type(ActionType::Conflict).len(),
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub replace: usize,
    pub start: usize,
    pub no_change: usize,
    pub conflict: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to replace, {} to start, {} unchanged",
            self.create, self.replace, self.start, self.no_change
        )?;
        if self.conflict > 0 {
            write!(f, ", {} in conflict", self.conflict)?;
        }
        Ok(())
    }
}
