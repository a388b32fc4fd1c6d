//! Stage selection and predecessor closure

use crate::error::{PipelineError, Result};
use crate::stage::{StageDescriptor, StageId};
use std::collections::{BTreeMap, BTreeSet};

/// `--only` / `--skip` tokens, each a stage name or tag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSelector {
    pub only: Vec<String>,
    pub skip: Vec<String>,
}

impl StageSelector {
    /// Select every stage
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(only: Vec<String>, skip: Vec<String>) -> Self {
        Self { only, skip }
    }

    /// Resolve tokens against the stage list
    ///
    /// An empty `only` selects everything; `skip` is applied afterwards.
    pub fn resolve(&self, descriptors: &[StageDescriptor]) -> Result<Selection> {
        for token in self.only.iter().chain(self.skip.iter()) {
            if !descriptors.iter().any(|d| d.matches(token)) {
                return Err(PipelineError::UnknownSelector(token.clone()));
            }
        }

        let selected = descriptors
            .iter()
            .filter(|d| self.only.is_empty() || self.only.iter().any(|t| d.matches(t)))
            .filter(|d| !self.skip.iter().any(|t| d.matches(t)))
            .map(|d| d.id)
            .collect();

        Ok(Selection { selected })
    }
}

/// Stages that run in this invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    selected: BTreeSet<StageId>,
}

impl Selection {
    pub fn of(ids: impl IntoIterator<Item = StageId>) -> Self {
        Self {
            selected: ids.into_iter().collect(),
        }
    }

    pub fn contains(&self, id: StageId) -> bool {
        self.selected.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = StageId> + '_ {
        self.selected.iter().copied()
    }
}

/// All transitive predecessors of `id`, nearest first
pub fn predecessor_closure(id: StageId, descriptors: &[StageDescriptor]) -> Vec<StageId> {
    let by_id: BTreeMap<StageId, &StageDescriptor> =
        descriptors.iter().map(|d| (d.id, d)).collect();

    let mut closure = Vec::new();
    let mut pending: Vec<StageId> = by_id
        .get(&id)
        .map(|d| d.predecessors.clone())
        .unwrap_or_default();

    while let Some(next) = pending.pop() {
        if closure.contains(&next) {
            continue;
        }
        closure.push(next);
        if let Some(descriptor) = by_id.get(&next) {
            pending.extend(descriptor.predecessors.iter().copied());
        }
    }
    closure
}

/// Check that every selected stage's predecessors are satisfied
///
/// A predecessor is satisfied when it is selected in this run or recorded as
/// applied by an earlier run. Returns, per selected stage, the skipped
/// predecessors it relies on so their readiness can be re-checked before it
/// runs.
pub fn check_preconditions(
    descriptors: &[StageDescriptor],
    selection: &Selection,
    is_applied: impl Fn(StageId) -> bool,
) -> Result<BTreeMap<StageId, Vec<StageId>>> {
    let mut relied_on = BTreeMap::new();

    let mut ordered: Vec<&StageDescriptor> = descriptors.iter().collect();
    ordered.sort_by_key(|d| d.ordinal);

    for descriptor in ordered.into_iter().filter(|d| selection.contains(d.id)) {
        let mut skipped = Vec::new();
        for predecessor in predecessor_closure(descriptor.id, descriptors) {
            if selection.contains(predecessor) {
                continue;
            }
            if !is_applied(predecessor) {
                return Err(PipelineError::PreconditionUnmet {
                    stage: descriptor.name.clone(),
                    reason: format!(
                        "predecessor '{}' is not selected and has not been applied successfully",
                        predecessor
                    ),
                });
            }
            skipped.push(predecessor);
        }
        relied_on.insert(descriptor.id, skipped);
    }

    Ok(relied_on)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Ledger, StageStatus};

    fn descriptors() -> Vec<StageDescriptor> {
        StageId::ALL
            .into_iter()
            .map(StageDescriptor::new)
            .map(|d| {
                if d.id == StageId::Database {
                    d.with_tag("mongodb")
                } else {
                    d
                }
            })
            .collect()
    }

    fn selector(only: &[&str], skip: &[&str]) -> StageSelector {
        StageSelector::new(
            only.iter().map(|s| s.to_string()).collect(),
            skip.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_all_selects_everything() {
        let selection = StageSelector::all().resolve(&descriptors()).unwrap();
        assert_eq!(selection.ids().count(), 6);
    }

    #[test]
    fn test_only_by_name_and_tag() {
        let selection = selector(&["network", "mongodb"], &[])
            .resolve(&descriptors())
            .unwrap();
        assert_eq!(
            selection.ids().collect::<Vec<_>>(),
            vec![StageId::NetworkProvisioning, StageId::Database]
        );
    }

    #[test]
    fn test_skip() {
        let selection = selector(&[], &["bootstrap", "git"])
            .resolve(&descriptors())
            .unwrap();
        assert!(!selection.contains(StageId::HostBootstrap));
        assert!(!selection.contains(StageId::SourceAcquisition));
        assert!(selection.contains(StageId::Frontend));
    }

    #[test]
    fn test_unknown_token() {
        let err = selector(&["cache"], &[]).resolve(&descriptors()).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownSelector(t) if t == "cache"));

        let err = selector(&[], &["nope"]).resolve(&descriptors()).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownSelector(_)));
    }

    #[test]
    fn test_closure_is_transitive() {
        let closure = predecessor_closure(StageId::Api, &descriptors());
        assert_eq!(
            closure,
            vec![
                StageId::Database,
                StageId::NetworkProvisioning,
                StageId::SourceAcquisition,
                StageId::HostBootstrap,
            ]
        );
        assert!(predecessor_closure(StageId::HostBootstrap, &descriptors()).is_empty());
    }

    #[test]
    fn test_precondition_unmet_when_never_applied() {
        let descriptors = descriptors();
        let selection = Selection::of([StageId::Api]);
        let err = check_preconditions(&descriptors, &selection, |_| false).unwrap_err();
        match err {
            PipelineError::PreconditionUnmet { stage, reason } => {
                assert_eq!(stage, "api");
                assert!(reason.contains("database"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_precondition_satisfied_by_ledger() {
        let descriptors = descriptors();
        let selection = Selection::of([StageId::Api, StageId::Frontend]);
        let relied = check_preconditions(&descriptors, &selection, |_| true).unwrap();

        assert_eq!(relied[&StageId::Api].len(), 4);
        assert_eq!(relied[&StageId::Api][0], StageId::Database);
        // api is selected, so frontend relies on the same four skipped stages
        assert_eq!(relied[&StageId::Frontend].len(), 4);
    }

    #[test]
    fn test_full_selection_needs_no_ledger() {
        let descriptors = descriptors();
        let selection = StageSelector::all().resolve(&descriptors).unwrap();
        let relied = check_preconditions(&descriptors, &selection, |_| false).unwrap();
        assert!(relied.values().all(|v| v.is_empty()));
    }

    #[test]
    fn test_partially_applied_history() {
        let descriptors = descriptors();
        let selection = Selection::of([StageId::Database]);
        // network never recorded as applied
        let applied = |id: StageId| id < StageId::NetworkProvisioning;
        assert!(check_preconditions(&descriptors, &selection, applied).is_err());
    }

    #[test]
    fn test_failed_predecessor_is_not_reported_as_never_applied() {
        let descriptors = descriptors();
        let mut ledger = Ledger::in_memory();
        ledger.record(StageId::HostBootstrap, StageStatus::Applied, None);
        ledger.record(
            StageId::SourceAcquisition,
            StageStatus::Failed,
            Some("fatal: repository not found".to_string()),
        );

        let selection = Selection::of([StageId::NetworkProvisioning]);
        let err = check_preconditions(&descriptors, &selection, |id| ledger.is_applied(id))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("source-acquisition"));
        assert!(message.contains("has not been applied successfully"));
        assert!(!message.contains("never"));
    }
}
