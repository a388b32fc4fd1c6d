//! 統合ローダー
//!
//! テンプレート展開、パース、検証を統合

use crate::error::{Result, TierError};
use crate::model::{Deployment, ServiceRole};
use crate::parser::parse_kdl_string;
use crate::template::{TemplateProcessor, extract_variables};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, instrument};

/// 設定ファイルを読み込んでDeploymentを生成
///
/// 1. variablesブロックの抽出
/// 2. テンプレート展開（variables / TIER_* 環境変数 / PROJECT_ROOT）
/// 3. KDLパース
/// 4. 検証
#[instrument(fields(path = %path.display()))]
pub fn load_deployment(path: &Path) -> Result<Deployment> {
    let content = std::fs::read_to_string(path).map_err(|e| TierError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let project_root = path.parent().unwrap_or_else(|| Path::new("."));

    let rendered = render(&content, project_root).map_err(|e| match e {
        TierError::TemplateRenderError(message) => TierError::TemplateError {
            file: path.to_path_buf(),
            message,
        },
        other => other,
    })?;

    let deployment = parse_kdl_string(&rendered, default_project_name(project_root))?;
    validate_deployment(&deployment)?;

    info!(
        project = %deployment.name,
        services = deployment.services.len(),
        "Deployment loaded"
    );
    Ok(deployment)
}

/// 文字列から読み込む（project_rootはPROJECT_ROOT変数とデフォルト名に使う）
pub fn load_deployment_str(content: &str, project_root: &Path) -> Result<Deployment> {
    let rendered = render(content, project_root)?;
    let deployment = parse_kdl_string(&rendered, default_project_name(project_root))?;
    validate_deployment(&deployment)?;
    Ok(deployment)
}

fn render(content: &str, project_root: &Path) -> Result<String> {
    let mut processor = TemplateProcessor::new();
    processor.add_variable(
        "PROJECT_ROOT",
        serde_json::Value::String(project_root.to_string_lossy().to_string()),
    );
    processor.add_env_variables();

    // ファイル内のvariablesが環境変数より優先
    let variables = extract_variables(content);
    debug!(count = variables.len(), "Collected variables");
    processor.add_variables(variables);

    processor.render_str(content)
}

fn default_project_name(project_root: &Path) -> String {
    project_root
        .canonicalize()
        .ok()
        .as_deref()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string()
}

/// デプロイ構成の整合性を検証
pub fn validate_deployment(deployment: &Deployment) -> Result<()> {
    for role in ServiceRole::ALL {
        let mut names: Vec<&str> = deployment
            .services
            .iter()
            .filter(|(_, s)| s.role == role)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort();
        match names.len() {
            0 => return Err(TierError::MissingRole(role.to_string())),
            1 => {}
            _ => {
                return Err(TierError::InvalidConfig(format!(
                    "role '{}' is assigned to multiple services: {}",
                    role,
                    names.join(", ")
                )));
            }
        }
    }

    let volumes: HashSet<&str> = deployment.volumes.iter().map(|v| v.name.as_str()).collect();

    let mut names: Vec<&String> = deployment.services.keys().collect();
    names.sort();
    for name in names {
        let service = &deployment.services[name];

        if service.image.is_none() && service.build.is_none() {
            return Err(TierError::InvalidConfig(format!(
                "service '{}' requires image or build",
                name
            )));
        }

        if (service.build.is_some() || service.config_file.is_some())
            && deployment.source.is_none()
        {
            return Err(TierError::InvalidConfig(format!(
                "service '{}' builds from source but no source block is defined",
                name
            )));
        }

        for mount in &service.mounts {
            if !volumes.contains(mount.volume.as_str()) {
                return Err(TierError::InvalidConfig(format!(
                    "service '{}' mounts undeclared volume '{}'",
                    name, mount.volume
                )));
            }
        }

        if let Some(readiness) = &service.readiness {
            if readiness.timeout_secs == Some(0) {
                return Err(TierError::InvalidConfig(format!(
                    "service '{}': readiness timeout must be greater than 0",
                    name
                )));
            }
            if readiness.interval_ms == Some(0) {
                return Err(TierError::InvalidConfig(format!(
                    "service '{}': readiness interval must be greater than 0",
                    name
                )));
            }
        }

        if let Some(config_file) = &service.config_file {
            if config_file.is_absolute() {
                return Err(TierError::InvalidConfig(format!(
                    "service '{}': config_file must be relative to the source tree",
                    name
                )));
            }
        }
    }

    Ok(())
}
