//! ソースコード取得設定

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// アプリケーションソースの取得元と展開先
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub repository: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub dest: PathBuf,
}

fn default_branch() -> String {
    "main".to_string()
}

impl SourceConfig {
    pub fn new(repository: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        Self {
            repository: repository.into(),
            branch: default_branch(),
            dest: dest.into(),
        }
    }
}
