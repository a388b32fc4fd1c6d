//! KDLパーサー
//!
//! tierflowのKDL設定ファイルをパースします。
//! 各ノードタイプのパース処理はモジュールに分離されています。

mod host;
mod service;

use host::{parse_host, parse_source};
use service::parse_service;

use crate::error::{Result, TierError};
use crate::model::{Deployment, NetworkSpec, Service, VolumeSpec};
use kdl::{KdlDocument, KdlNode};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// KDLファイルをパースしてDeploymentを生成
pub fn parse_kdl_file<P: AsRef<Path>>(path: P) -> Result<Deployment> {
    let content = fs::read_to_string(path.as_ref())?;
    let name = path
        .as_ref()
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    parse_kdl_string(&content, name)
}

/// KDL文字列をパース
pub fn parse_kdl_string(content: &str, default_name: String) -> Result<Deployment> {
    let doc: KdlDocument = content.parse()?;

    let mut name = default_name;
    let mut host = None;
    let mut source = None;
    let mut network: Option<NetworkSpec> = None;
    let mut volumes: Vec<VolumeSpec> = Vec::new();
    let mut services: HashMap<String, Service> = HashMap::new();
    let mut variables: HashMap<String, String> = HashMap::new();

    for node in doc.nodes() {
        match node.name().value() {
            "project" => {
                if let Some(project_name) = first_string(node) {
                    name = project_name.to_string();
                }
            }
            "host" => {
                host = Some(parse_host(node)?);
            }
            "source" => {
                source = Some(parse_source(node)?);
            }
            "network" => {
                let network_name = first_string(node).ok_or_else(|| {
                    TierError::InvalidConfig("network requires a name".to_string())
                })?;
                let mut spec = NetworkSpec::new(network_name);
                if let Some(driver) = node.get("driver").and_then(|v| v.as_string()) {
                    spec.driver = driver.to_string();
                }
                network = Some(spec);
            }
            "volume" => {
                let volume_name = first_string(node).ok_or_else(|| {
                    TierError::InvalidConfig("volume requires a name".to_string())
                })?;
                let mut spec = VolumeSpec::new(volume_name);
                if let Some(driver) = node.get("driver").and_then(|v| v.as_string()) {
                    spec.driver = driver.to_string();
                }
                // 同名のボリュームは後勝ち
                volumes.retain(|v| v.name != spec.name);
                volumes.push(spec);
            }
            "service" => {
                let (service_name, service) = parse_service(node)?;
                if services.contains_key(&service_name) {
                    return Err(TierError::InvalidConfig(format!(
                        "service '{}' is defined more than once",
                        service_name
                    )));
                }
                services.insert(service_name, service);
            }
            "variables" => {
                // テンプレート展開済みの値をそのまま保持
                if let Some(vars) = node.children() {
                    for var in vars.nodes() {
                        let key = var.name().value().to_string();
                        let value = var
                            .entries()
                            .first()
                            .map(|e| kdl_value_to_string(e.value()))
                            .unwrap_or_default();
                        variables.insert(key, value);
                    }
                }
            }
            _ => {
                // 不明なノードはスキップ
            }
        }
    }

    let network = network.unwrap_or_else(|| NetworkSpec::new(format!("{}-net", name)));

    Ok(Deployment {
        name,
        host: host.unwrap_or_default(),
        source,
        network,
        volumes,
        services,
        variables,
    })
}

/// 最初の位置引数を文字列として取得
pub(crate) fn first_string(node: &KdlNode) -> Option<&str> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
}

/// 最初の位置引数を整数として取得
pub(crate) fn first_integer(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

/// ブール値をパースし、`true`/`false` 文字列が使用された場合は警告を出力
///
/// KDL v2では `#true`/`#false` を使用する必要がある
pub(crate) fn parse_bool_with_hint(node: &KdlNode, key: &str) -> Option<bool> {
    let value = node.get(key)?;
    if let Some(b) = value.as_bool() {
        return Some(b);
    }

    match value.as_string() {
        Some(s @ ("true" | "false")) => {
            tracing::warn!(
                key = %key,
                "'{key}=\"{s}\"' is a string, not a boolean. Use '#{s}' in KDL v2"
            );
            Some(s == "true")
        }
        _ => None,
    }
}

/// KDL値を文字列化（variablesブロック用）
fn kdl_value_to_string(value: &kdl::KdlValue) -> String {
    if let Some(s) = value.as_string() {
        s.to_string()
    } else if let Some(i) = value.as_integer() {
        i.to_string()
    } else if let Some(f) = value.as_float() {
        f.to_string()
    } else if let Some(b) = value.as_bool() {
        b.to_string()
    } else {
        String::new()
    }
}
