pub mod error;

pub use error::*;

use std::path::{Path, PathBuf};

/// 設定ファイルのパスを直接指定する環境変数
pub const CONFIG_PATH_ENV: &str = "TIER_CONFIG_PATH";

/// プロジェクト内の作業ディレクトリ名（台帳・ロック・Vault）
pub const PROJECT_DIR: &str = ".tierflow";

const CANDIDATES: [&str; 4] = ["tier.local.kdl", ".tier.local.kdl", "tier.kdl", ".tier.kdl"];

/// tierflowのグローバル設定ディレクトリを取得（無ければ作成）
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("tierflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Vault鍵ファイルのパス（~/.config/tierflow/vault.key）
pub fn vault_key_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("vault.key"))
}

/// プロジェクトの作業ディレクトリ
pub fn project_dir(project_root: &Path) -> PathBuf {
    project_root.join(PROJECT_DIR)
}

/// プロジェクトのVaultファイル
pub fn vault_path(project_root: &Path) -> PathBuf {
    project_dir(project_root).join("secrets.vault")
}

/// プロジェクトのtier.kdlを探す
///
/// 以下の優先順位で設定ファイルを検索:
/// 1. 環境変数 TIER_CONFIG_PATH (直接パス指定)
/// 2. カレントディレクトリ: tier.local.kdl, .tier.local.kdl, tier.kdl, .tier.kdl
/// 3. ./.tierflow/ ディレクトリ内: 同様の順序
/// 4. ~/.config/tierflow/tier.kdl (グローバル設定)
pub fn find_deploy_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(&config_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::ConfigPathMissing(config_path));
    }

    let current_dir = std::env::current_dir()?;
    if let Some(path) = find_deploy_file_in(&current_dir) {
        return Ok(path);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("tierflow").join("tier.kdl");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::DeployFileNotFound)
}

/// 指定ディレクトリとその .tierflow/ から設定ファイルを探す
pub fn find_deploy_file_in(dir: &Path) -> Option<PathBuf> {
    let search_dirs = [dir.to_path_buf(), dir.join(PROJECT_DIR)];
    search_dirs
        .iter()
        .filter(|d| d.is_dir())
        .flat_map(|d| CANDIDATES.iter().map(move |name| d.join(name)))
        .find(|path| path.is_file())
}

/// 設定ファイルの位置からプロジェクトルートを決める
///
/// `.tierflow/` 内の設定ファイルならその親ディレクトリ
pub fn project_root_for(deploy_file: &Path) -> PathBuf {
    let parent = deploy_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if parent.file_name().and_then(|n| n.to_str()) == Some(PROJECT_DIR) {
        parent
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| parent.to_path_buf())
    } else {
        parent.to_path_buf()
    }
}
