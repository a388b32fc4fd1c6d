//! Staged deployment pipeline
//!
//! Converges a host to a declared three-tier deployment through six ordered
//! stages. Each stage applies its resources idempotently and, where it has
//! one, waits on a readiness target before the next stage starts.
//!
//! The container runtime, version-control client and package manager are
//! consumed through the traits in [`provider`], so the pipeline itself never
//! talks to Docker, git or apt directly.

pub mod action;
pub mod applier;
pub mod error;
pub mod ledger;
pub mod provider;
pub mod readiness;
pub mod resource;
pub mod selector;
pub mod sequencer;
pub mod stage;
pub mod stages;
pub mod verify;

#[cfg(test)]
mod testing;

pub use action::{Action, ActionType, Plan, PlanSummary};
pub use applier::ResourceApplier;
pub use error::{PipelineError, Result, ToolError};
pub use ledger::{Ledger, RunLock, StageStatus, acquire_lock};
pub use provider::{ContainerRuntime, PackageManager, SourceControl, ToolResult};
pub use readiness::{Probe, Readiness, ReadinessGate, ReadinessTarget, TcpProbe};
pub use resource::{BuildRequest, ContainerSpec};
pub use selector::{Selection, StageSelector};
pub use sequencer::{PipelineObserver, RunReport, Sequencer, StageOutcome, StageReport};
pub use stage::{Stage, StageContext, StageDescriptor, StageId, StageOutput};
pub use stages::{build_stages, stage_descriptors};
pub use verify::{VerificationReport, VerificationWarning, Verifier};
