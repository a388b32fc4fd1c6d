//! Host collaborators
//!
//! Command-line wrappers implementing the pipeline's `SourceControl` (git)
//! and `PackageManager` (apt-get) capabilities.

pub mod apt;
mod command;
pub mod error;
pub mod git;

pub use apt::AptPackages;
pub use command::command_exists;
pub use error::{HostError, Result};
pub use git::GitCli;
