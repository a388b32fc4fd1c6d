//! git CLI wrapper

use crate::command::run;
use async_trait::async_trait;
use std::path::Path;
use tierflow_pipeline::{SourceControl, ToolResult};
use tokio::process::Command;

/// Clones with the `git` binary found on PATH
pub struct GitCli {
    program: String,
}

impl GitCli {
    pub fn new() -> Self {
        Self::with_program("git")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for a shallow single-branch clone
    pub fn clone_args(repository: &str, branch: &str, dest: &Path) -> Vec<String> {
        vec![
            "clone".to_string(),
            "--branch".to_string(),
            branch.to_string(),
            "--single-branch".to_string(),
            "--depth".to_string(),
            "1".to_string(),
            repository.to_string(),
            dest.display().to_string(),
        ]
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn clone_repository(
        &self,
        repository: &str,
        branch: &str,
        dest: &Path,
    ) -> ToolResult<()> {
        let args = Self::clone_args(repository, branch, dest);
        let mut cmd = Command::new(&self.program);
        cmd.args(&args);
        // never block on a credential prompt
        cmd.env("GIT_TERMINAL_PROMPT", "0");

        let command_line = format!("{} {}", self.program, args.join(" "));
        run(cmd, &command_line).await?;
        tracing::info!(repository, branch, "Cloned repository");
        Ok(())
    }
}
