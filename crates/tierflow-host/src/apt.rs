//! apt-get package manager

use crate::command::{command_exists, run};
use async_trait::async_trait;
use tierflow_core::HostPackage;
use tierflow_pipeline::{PackageManager, ToolResult};
use tokio::process::Command;

/// Installs packages with apt-get, optionally through sudo
pub struct AptPackages {
    program: String,
    sudo: bool,
}

impl AptPackages {
    pub fn new(sudo: bool) -> Self {
        Self {
            program: "apt-get".to_string(),
            sudo,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, args: &[&str]) -> (Command, String) {
        let mut argv: Vec<&str> = Vec::with_capacity(args.len() + 2);
        if self.sudo {
            argv.push("sudo");
            argv.push("-n");
        }
        argv.push(&self.program);
        argv.extend_from_slice(args);

        let mut cmd = Command::new(argv[0]);
        cmd.args(&argv[1..]);
        cmd.env("DEBIAN_FRONTEND", "noninteractive");
        (cmd, argv.join(" "))
    }
}

#[async_trait]
impl PackageManager for AptPackages {
    /// A package counts as installed when its probe command is on PATH
    async fn is_installed(&self, package: &HostPackage) -> ToolResult<bool> {
        Ok(command_exists(package.probe_command()).await?)
    }

    async fn install(&self, packages: &[HostPackage]) -> ToolResult<()> {
        if packages.is_empty() {
            return Ok(());
        }

        let (update, display) = self.command(&["update", "-q"]);
        run(update, &display).await?;

        let mut args = vec!["install", "-y", "-q"];
        args.extend(packages.iter().map(|p| p.name.as_str()));
        let (install, display) = self.command(&args);
        run(install, &display).await?;

        tracing::info!(count = packages.len(), "Installed host packages");
        Ok(())
    }
}
