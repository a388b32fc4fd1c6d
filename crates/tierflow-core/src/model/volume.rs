//! ボリューム定義

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 名前付き永続ボリューム
///
/// 一度作成されたら、パイプラインからは削除されない
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    #[serde(default = "default_driver")]
    pub driver: String,
}

impl VolumeSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: default_driver(),
        }
    }
}

fn default_driver() -> String {
    "local".to_string()
}

/// コンテナへのボリュームマウント
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub volume: String,
    pub path: PathBuf,
    #[serde(default)]
    pub read_only: bool,
}
