//! ホスト側の前提パッケージ定義

use serde::{Deserialize, Serialize};

/// パッケージがどのステージで必要になるか
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageRole {
    /// コンテナランタイム（Host Bootstrap）
    #[default]
    Runtime,
    /// バージョン管理クライアント（Source Acquisition）
    Vcs,
}

impl PackageRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "runtime" => Some(Self::Runtime),
            "vcs" => Some(Self::Vcs),
            _ => None,
        }
    }
}

/// インストールを保証するパッケージ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPackage {
    /// パッケージマネージャ上の名前
    pub name: String,
    /// インストール済み判定に使うコマンド名
    pub command: Option<String>,
    #[serde(default)]
    pub role: PackageRole,
}

impl HostPackage {
    pub fn new(name: impl Into<String>, command: Option<&str>, role: PackageRole) -> Self {
        Self {
            name: name.into(),
            command: command.map(String::from),
            role,
        }
    }

    /// 判定に使うコマンド名（未指定ならパッケージ名）
    pub fn probe_command(&self) -> &str {
        self.command.as_deref().unwrap_or(&self.name)
    }
}

/// ホスト設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    pub packages: Vec<HostPackage>,
    /// パッケージ操作を sudo 経由で行う
    #[serde(default)]
    pub sudo: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            packages: vec![
                HostPackage::new("docker.io", Some("docker"), PackageRole::Runtime),
                HostPackage::new("git", Some("git"), PackageRole::Vcs),
            ],
            sudo: false,
        }
    }
}

impl HostConfig {
    pub fn packages_for(&self, role: PackageRole) -> Vec<&HostPackage> {
        self.packages.iter().filter(|p| p.role == role).collect()
    }
}
