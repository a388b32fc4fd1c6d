//! サービスのパース

use super::{first_integer, first_string, parse_bool_with_hint};
use crate::error::{Result, TierError};
use crate::model::{
    BuildConfig, Port, Protocol, ReadinessConfig, Service, ServiceRole, VolumeMount,
};
use kdl::KdlNode;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// serviceノードをパース
///
/// roleプロパティが無い場合はサービス名からroleを推定する
pub fn parse_service(node: &KdlNode) -> Result<(String, Service)> {
    let name = first_string(node)
        .ok_or_else(|| TierError::InvalidConfig("service requires a name".to_string()))?
        .to_string();

    let role = match node.get("role").and_then(|v| v.as_string()) {
        Some(role) => ServiceRole::parse(role).ok_or_else(|| {
            TierError::InvalidConfig(format!(
                "service '{}': unknown role '{}' (expected database, api or frontend)",
                name, role
            ))
        })?,
        None => ServiceRole::parse(&name).ok_or_else(|| {
            TierError::InvalidConfig(format!("service '{}' requires role=", name))
        })?,
    };

    let mut service = Service::new(role);

    let Some(children) = node.children() else {
        return Ok((name, service));
    };

    for child in children.nodes() {
        match child.name().value() {
            "image" => {
                service.image = first_string(child).map(String::from);
            }
            "build" => {
                service.build = Some(parse_build(child));
            }
            "container_name" => {
                service.container_name = first_string(child).map(String::from);
            }
            "port" => {
                let port = parse_port(child).map_err(|msg| {
                    TierError::InvalidConfig(format!("service '{}': {}", name, msg))
                })?;
                service.ports.push(port);
            }
            "ports" => {
                if let Some(ports) = child.children() {
                    for port_node in ports.nodes().iter().filter(|n| n.name().value() == "port") {
                        let port = parse_port(port_node).map_err(|msg| {
                            TierError::InvalidConfig(format!("service '{}': {}", name, msg))
                        })?;
                        service.ports.push(port);
                    }
                }
            }
            "env" | "environment" => {
                if let Some(vars) = child.children() {
                    for var in vars.nodes() {
                        let key = var.name().value().to_string();
                        if let Some(value) = first_string(var) {
                            service.environment.insert(key, value.to_string());
                        } else if let Some(value) = first_integer(var) {
                            service.environment.insert(key, value.to_string());
                        }
                    }
                }
            }
            "mount" => {
                let mount = parse_mount(child).ok_or_else(|| {
                    TierError::InvalidConfig(format!(
                        "service '{}': mount requires volume= and path=",
                        name
                    ))
                })?;
                service.mounts.push(mount);
            }
            "command" => {
                service.command = first_string(child).map(String::from);
            }
            "config_file" => {
                service.config_file = first_string(child).map(PathBuf::from);
            }
            "readiness" => {
                service.readiness = Some(parse_readiness(child));
            }
            other => {
                tracing::debug!(service = %name, node = %other, "unknown service child ignored");
            }
        }
    }

    Ok((name, service))
}

/// ポート定義をパース
///
/// `port host=8080 container=3000 protocol="tcp" host_ip="0.0.0.0"`
/// または `port 8080 3000` の位置引数形式
fn parse_port(node: &KdlNode) -> std::result::Result<Port, String> {
    let positional: Vec<i128> = node
        .entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_integer())
        .collect();

    let host = node
        .get("host")
        .and_then(|v| v.as_integer())
        .or_else(|| positional.first().copied())
        .ok_or_else(|| "port requires host=".to_string())?;
    let container = node
        .get("container")
        .and_then(|v| v.as_integer())
        .or_else(|| positional.get(1).copied())
        .unwrap_or(host);

    let protocol = node
        .get("protocol")
        .and_then(|v| v.as_string())
        .map(Protocol::parse)
        .unwrap_or_default();
    let host_ip = node
        .get("host_ip")
        .and_then(|v| v.as_string())
        .map(String::from);

    Ok(Port {
        host: to_port(host)?,
        container: to_port(container)?,
        protocol,
        host_ip,
    })
}

fn to_port(value: i128) -> std::result::Result<u16, String> {
    match u16::try_from(value) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(format!("port {} is out of range (1-65535)", value)),
    }
}

/// `mount volume="data" path="/data/db" read_only=#true`
fn parse_mount(node: &KdlNode) -> Option<VolumeMount> {
    let volume = node.get("volume").and_then(|v| v.as_string())?;
    let path = node.get("path").and_then(|v| v.as_string())?;
    Some(VolumeMount {
        volume: volume.to_string(),
        path: PathBuf::from(path),
        read_only: parse_bool_with_hint(node, "read_only").unwrap_or(false),
    })
}

fn parse_build(node: &KdlNode) -> BuildConfig {
    let context = node
        .get("context")
        .and_then(|v| v.as_string())
        .or_else(|| first_string(node))
        .map(PathBuf::from);
    let dockerfile = node
        .get("dockerfile")
        .and_then(|v| v.as_string())
        .map(PathBuf::from);

    let mut args = BTreeMap::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() != "arg" {
                continue;
            }
            // arg KEY "value"
            let mut positional = child.entries().iter().filter(|e| e.name().is_none());
            let key = positional.next().and_then(|e| e.value().as_string());
            let value = positional.next().and_then(|e| e.value().as_string());
            if let (Some(key), Some(value)) = (key, value) {
                args.insert(key.to_string(), value.to_string());
            }
        }
    }

    BuildConfig {
        context,
        dockerfile,
        args,
    }
}

/// `readiness host="127.0.0.1" port=5000 timeout=120 interval=500`
fn parse_readiness(node: &KdlNode) -> ReadinessConfig {
    ReadinessConfig {
        host: node
            .get("host")
            .and_then(|v| v.as_string())
            .map(String::from),
        port: node
            .get("port")
            .and_then(|v| v.as_integer())
            .and_then(|v| u16::try_from(v).ok()),
        timeout_secs: node
            .get("timeout")
            .and_then(|v| v.as_integer())
            .and_then(|v| u64::try_from(v).ok()),
        interval_ms: node
            .get("interval")
            .and_then(|v| v.as_integer())
            .and_then(|v| u64::try_from(v).ok()),
    }
}
