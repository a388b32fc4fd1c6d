//! Pipeline Sequencer
//!
//! Runs the selected stages in ordinal order. After each stage it waits on
//! the stage's readiness target, so a dependent stage never starts before its
//! dependency accepts connections. The first failure halts the run and every
//! later stage is reported as not run.

use crate::action::Plan;
use crate::error::PipelineError;
use crate::ledger::{Ledger, StageStatus};
use crate::readiness::{Readiness, ReadinessGate, ReadinessTarget};
use crate::selector::{Selection, check_preconditions};
use crate::stage::{Stage, StageContext, StageDescriptor, StageId, StageOutput};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What happened to one stage
#[derive(Debug)]
pub enum StageOutcome {
    Applied(StageOutput),
    /// Not selected for this run
    Skipped,
    Failed(PipelineError),
    /// Selected but never reached because an earlier stage failed
    NotRun,
}

impl StageOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            StageOutcome::Applied(_) => "applied",
            StageOutcome::Skipped => "skipped",
            StageOutcome::Failed(_) => "failed",
            StageOutcome::NotRun => "not run",
        }
    }
}

#[derive(Debug)]
pub struct StageReport {
    pub descriptor: StageDescriptor,
    pub outcome: StageOutcome,
}

/// Result of one pipeline run
#[derive(Debug)]
pub struct RunReport {
    pub stages: Vec<StageReport>,
    pub dry_run: bool,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.first_failed().is_none()
    }

    /// Last stage that completed in this run
    pub fn last_completed(&self) -> Option<&StageDescriptor> {
        self.stages
            .iter()
            .filter(|s| matches!(s.outcome, StageOutcome::Applied(_)))
            .map(|s| &s.descriptor)
            .last()
    }

    pub fn first_failed(&self) -> Option<(&StageDescriptor, &PipelineError)> {
        self.stages.iter().find_map(|s| match &s.outcome {
            StageOutcome::Failed(e) => Some((&s.descriptor, e)),
            _ => None,
        })
    }

    pub fn outcome_of(&self, id: StageId) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|s| s.descriptor.id == id)
            .map(|s| &s.outcome)
    }

    /// All actions of the applied stages, in stage order
    pub fn plan(&self) -> Plan {
        let actions = self
            .stages
            .iter()
            .filter_map(|s| match &s.outcome {
                StageOutcome::Applied(output) => Some(output.actions.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect();
        Plan::new(actions)
    }
}

/// Progress callbacks for front ends
pub trait PipelineObserver: Send + Sync {
    fn stage_started(&self, _descriptor: &StageDescriptor) {}

    fn stage_skipped(&self, _descriptor: &StageDescriptor) {}

    fn waiting_for(&self, _descriptor: &StageDescriptor, _target: &ReadinessTarget) {}

    fn stage_finished(&self, _descriptor: &StageDescriptor, _outcome: &StageOutcome) {}
}

/// Observer that ignores every event
pub struct SilentObserver;

impl PipelineObserver for SilentObserver {}

pub struct Sequencer {
    gate: ReadinessGate,
    observer: Arc<dyn PipelineObserver>,
    cancel: CancellationToken,
}

impl Sequencer {
    /// The gate should share the sequencer's cancellation token
    pub fn new(gate: ReadinessGate) -> Self {
        Self {
            gate,
            observer: Arc::new(SilentObserver),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.gate = self.gate.with_cancellation(cancel.clone());
        self.cancel = cancel;
        self
    }

    /// Execute the selected stages
    ///
    /// Preconditions are checked for the whole selection before anything is
    /// applied. In a dry run the ledger is only updated in memory and no
    /// readiness waits happen.
    pub async fn run(
        &self,
        stages: &[Arc<dyn Stage>],
        selection: &Selection,
        ledger: &mut Ledger,
        dry_run: bool,
    ) -> RunReport {
        let mut ordered: Vec<Arc<dyn Stage>> = stages.to_vec();
        ordered.sort_by_key(|s| s.descriptor().ordinal);
        let descriptors: Vec<StageDescriptor> =
            ordered.iter().map(|s| s.descriptor().clone()).collect();

        let relied_on = match check_preconditions(&descriptors, selection, |id| {
            ledger.is_applied(id)
        }) {
            Ok(relied_on) => relied_on,
            Err(e) => return self.rejected(&descriptors, selection, e, dry_run),
        };

        let readiness_of: BTreeMap<StageId, ReadinessTarget> = ordered
            .iter()
            .filter_map(|s| s.readiness().map(|t| (s.descriptor().id, t)))
            .collect();

        let ctx = StageContext::new(dry_run, self.cancel.clone());
        let mut reprobed = BTreeSet::new();
        let mut halted = false;
        let mut reports = Vec::with_capacity(ordered.len());

        for stage in &ordered {
            let descriptor = stage.descriptor().clone();

            if !selection.contains(descriptor.id) {
                self.observer.stage_skipped(&descriptor);
                reports.push(StageReport {
                    descriptor,
                    outcome: StageOutcome::Skipped,
                });
                continue;
            }
            if halted {
                reports.push(StageReport {
                    descriptor,
                    outcome: StageOutcome::NotRun,
                });
                continue;
            }

            // only a stage whose apply ran gets a ledger record
            let mut attempted = false;
            let outcome = if self.cancel.is_cancelled() {
                StageOutcome::Failed(PipelineError::Cancelled)
            } else {
                let skipped = relied_on
                    .get(&descriptor.id)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                match self
                    .recheck_skipped(&descriptor, skipped, &readiness_of, &mut reprobed, dry_run)
                    .await
                {
                    Err(e) => StageOutcome::Failed(e),
                    Ok(()) => {
                        attempted = true;
                        self.observer.stage_started(&descriptor);
                        self.execute(stage.as_ref(), &descriptor, &ctx).await
                    }
                }
            };

            if let StageOutcome::Failed(e) = &outcome {
                warn!(stage = %descriptor.name, error = %e, "Stage failed");
                halted = true;
            } else {
                info!(stage = %descriptor.name, "Stage applied");
            }

            if attempted {
                let (status, message) = match &outcome {
                    StageOutcome::Failed(e) => (StageStatus::Failed, Some(e.to_string())),
                    _ => (StageStatus::Applied, None),
                };
                if dry_run {
                    ledger.record(descriptor.id, status, message);
                } else if let Err(e) = ledger.record_and_save(descriptor.id, status, message).await
                {
                    warn!(stage = %descriptor.name, error = %e, "Failed to write ledger");
                }
            }

            self.observer.stage_finished(&descriptor, &outcome);
            reports.push(StageReport {
                descriptor,
                outcome,
            });
        }

        RunReport {
            stages: reports,
            dry_run,
        }
    }

    /// Apply one stage and wait on its readiness target
    async fn execute(
        &self,
        stage: &dyn Stage,
        descriptor: &StageDescriptor,
        ctx: &StageContext,
    ) -> StageOutcome {
        // a stage in flight is allowed to finish; cancellation is observed afterwards
        let output = match stage.apply(ctx).await {
            Ok(output) => output,
            Err(e) => return StageOutcome::Failed(e),
        };

        if ctx.dry_run {
            return StageOutcome::Applied(output);
        }

        if let Some(target) = stage.readiness() {
            self.observer.waiting_for(descriptor, &target);
            if let Err(e) = self.await_target(&target).await {
                return StageOutcome::Failed(e);
            }
        }
        StageOutcome::Applied(output)
    }

    async fn await_target(&self, target: &ReadinessTarget) -> Result<Duration, PipelineError> {
        match self.gate.wait_for(target).await {
            Readiness::Ready { elapsed } => Ok(elapsed),
            Readiness::TimedOut { .. } => Err(PipelineError::ReadinessTimeout {
                endpoint: target.endpoint.to_string(),
                timeout: target.policy.timeout,
            }),
            Readiness::Cancelled => Err(PipelineError::Cancelled),
        }
    }

    /// Skipped predecessors with a readiness target must still be reachable
    ///
    /// Each one is probed at most once per run, right before the first stage
    /// that relies on it.
    async fn recheck_skipped(
        &self,
        descriptor: &StageDescriptor,
        skipped: &[StageId],
        readiness_of: &BTreeMap<StageId, ReadinessTarget>,
        reprobed: &mut BTreeSet<StageId>,
        dry_run: bool,
    ) -> Result<(), PipelineError> {
        if dry_run {
            return Ok(());
        }

        for predecessor in skipped {
            let Some(target) = readiness_of.get(predecessor) else {
                continue;
            };
            if reprobed.contains(predecessor) {
                continue;
            }

            self.observer.waiting_for(descriptor, target);
            match self.await_target(target).await {
                Ok(_) => {
                    reprobed.insert(*predecessor);
                }
                Err(PipelineError::ReadinessTimeout { endpoint, .. }) => {
                    return Err(PipelineError::PreconditionUnmet {
                        stage: descriptor.name.clone(),
                        reason: format!(
                            "predecessor '{}' was applied earlier but {} is not reachable",
                            predecessor, endpoint
                        ),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Report for a run refused before any stage was applied
    fn rejected(
        &self,
        descriptors: &[StageDescriptor],
        selection: &Selection,
        error: PipelineError,
        dry_run: bool,
    ) -> RunReport {
        let failing = match &error {
            PipelineError::PreconditionUnmet { stage, .. } => Some(stage.clone()),
            _ => None,
        };
        let mut error = Some(error);

        let stages = descriptors
            .iter()
            .map(|descriptor| {
                let outcome = if !selection.contains(descriptor.id) {
                    StageOutcome::Skipped
                } else if failing.as_deref() == Some(descriptor.name.as_str()) {
                    match error.take() {
                        Some(e) => StageOutcome::Failed(e),
                        None => StageOutcome::NotRun,
                    }
                } else {
                    StageOutcome::NotRun
                };
                StageReport {
                    descriptor: descriptor.clone(),
                    outcome,
                }
            })
            .collect();

        RunReport { stages, dry_run }
    }
}
