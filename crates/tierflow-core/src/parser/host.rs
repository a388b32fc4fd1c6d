//! host / source ノードのパース

use super::{first_string, parse_bool_with_hint};
use crate::error::{Result, TierError};
use crate::model::{HostConfig, HostPackage, PackageRole, SourceConfig};
use kdl::KdlNode;
use std::path::PathBuf;

/// hostノードをパース
///
/// ```kdl
/// host sudo=#true {
///     package "docker.io" command="docker"
///     package "git" role="vcs"
/// }
/// ```
///
/// packageが一つも無い場合はデフォルト（docker.io / git）を使う
pub fn parse_host(node: &KdlNode) -> Result<HostConfig> {
    let mut packages = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() != "package" {
                continue;
            }
            let name = first_string(child).ok_or_else(|| {
                TierError::InvalidConfig("package requires a name".to_string())
            })?;
            let role = match child.get("role").and_then(|v| v.as_string()) {
                Some(r) => PackageRole::parse(r).ok_or_else(|| {
                    TierError::InvalidConfig(format!(
                        "package '{}': unknown role '{}' (expected runtime or vcs)",
                        name, r
                    ))
                })?,
                None => PackageRole::default(),
            };
            let command = child.get("command").and_then(|v| v.as_string());
            packages.push(HostPackage::new(name, command, role));
        }
    }

    let mut config = HostConfig::default();
    if !packages.is_empty() {
        config.packages = packages;
    }
    config.sudo = parse_bool_with_hint(node, "sudo").unwrap_or(false);
    Ok(config)
}

/// sourceノードをパース
///
/// ```kdl
/// source {
///     repository "https://github.com/example/shop.git"
///     branch "main"
///     dest "/opt/shop"
/// }
/// ```
pub fn parse_source(node: &KdlNode) -> Result<SourceConfig> {
    let mut repository = node
        .get("repository")
        .and_then(|v| v.as_string())
        .map(String::from);
    let mut branch = node
        .get("branch")
        .and_then(|v| v.as_string())
        .map(String::from);
    let mut dest = node
        .get("dest")
        .and_then(|v| v.as_string())
        .map(PathBuf::from);

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let value = first_string(child).map(String::from);
            match child.name().value() {
                "repository" => repository = value,
                "branch" => branch = value,
                "dest" => dest = value.map(PathBuf::from),
                _ => {}
            }
        }
    }

    let repository = repository
        .ok_or_else(|| TierError::InvalidConfig("source requires repository".to_string()))?;
    let dest = dest.ok_or_else(|| TierError::InvalidConfig("source requires dest".to_string()))?;

    let mut source = SourceConfig::new(repository, dest);
    if let Some(branch) = branch {
        source.branch = branch;
    }
    Ok(source)
}
