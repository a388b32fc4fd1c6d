//! Stage definitions

use crate::action::Action;
use crate::error::Result;
use crate::readiness::ReadinessTarget;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// The six pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageId {
    HostBootstrap,
    SourceAcquisition,
    NetworkProvisioning,
    Database,
    Api,
    Frontend,
}

impl StageId {
    pub const ALL: [StageId; 6] = [
        Self::HostBootstrap,
        Self::SourceAcquisition,
        Self::NetworkProvisioning,
        Self::Database,
        Self::Api,
        Self::Frontend,
    ];

    pub fn ordinal(&self) -> u8 {
        match self {
            Self::HostBootstrap => 1,
            Self::SourceAcquisition => 2,
            Self::NetworkProvisioning => 3,
            Self::Database => 4,
            Self::Api => 5,
            Self::Frontend => 6,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::HostBootstrap => "host-bootstrap",
            Self::SourceAcquisition => "source-acquisition",
            Self::NetworkProvisioning => "network-provisioning",
            Self::Database => "database",
            Self::Api => "api",
            Self::Frontend => "frontend",
        }
    }

    /// Built-in tags accepted by `--only` / `--skip`
    pub fn default_tags(&self) -> &'static [&'static str] {
        match self {
            Self::HostBootstrap => &["bootstrap", "docker", "host"],
            Self::SourceAcquisition => &["source", "git", "clone"],
            Self::NetworkProvisioning => &["network"],
            Self::Database => &["db", "stateful"],
            Self::Api => &["backend", "stateless"],
            Self::Frontend => &["web", "presentation"],
        }
    }

    /// Each stage's postcondition is the next one's precondition
    pub fn predecessor(&self) -> Option<StageId> {
        match self {
            Self::HostBootstrap => None,
            Self::SourceAcquisition => Some(Self::HostBootstrap),
            Self::NetworkProvisioning => Some(Self::SourceAcquisition),
            Self::Database => Some(Self::NetworkProvisioning),
            Self::Api => Some(Self::Database),
            Self::Frontend => Some(Self::Api),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.name() == s)
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Static description of a stage; never mutated during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    pub id: StageId,
    pub name: String,
    pub ordinal: u8,
    pub predecessors: Vec<StageId>,
    pub tags: Vec<String>,
}

impl StageDescriptor {
    pub fn new(id: StageId) -> Self {
        Self {
            id,
            name: id.name().to_string(),
            ordinal: id.ordinal(),
            predecessors: id.predecessor().into_iter().collect(),
            tags: id.default_tags().iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    /// Matches the stage name or any of its tags
    pub fn matches(&self, token: &str) -> bool {
        self.name == token || self.tags.iter().any(|t| t == token)
    }
}

/// Per-run context handed to every stage
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Compute actions without executing them
    pub dry_run: bool,
    pub cancel: CancellationToken,
}

impl StageContext {
    pub fn new(dry_run: bool, cancel: CancellationToken) -> Self {
        Self { dry_run, cancel }
    }
}

/// What a stage did (or would do in a dry run)
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub actions: Vec<Action>,
    pub notes: Vec<String>,
}

impl StageOutput {
    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}

/// One ordered unit of the deployment pipeline
#[async_trait]
pub trait Stage: Send + Sync {
    fn descriptor(&self) -> &StageDescriptor;

    /// Converge this stage's resources; must be safe to repeat
    async fn apply(&self, ctx: &StageContext) -> Result<StageOutput>;

    /// Endpoint to wait on once `apply` succeeds
    fn readiness(&self) -> Option<ReadinessTarget> {
        None
    }
}
