use thiserror::Error;
use tierflow_pipeline::ToolError;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("{program} is not installed or not on PATH")]
    ProgramNotFound { program: String },

    /// The command ran and exited unsuccessfully; carries its own stderr
    #[error("{message}")]
    CommandFailed { command: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<HostError> for ToolError {
    fn from(err: HostError) -> Self {
        ToolError::new(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HostError>;
