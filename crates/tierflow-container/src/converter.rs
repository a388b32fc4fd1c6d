//! ContainerSpec から Docker API パラメータへの変換

// Bollard 0.19 の非推奨APIを使用
#![allow(deprecated)]

use bollard::container::{Config, CreateContainerOptions, NetworkingConfig};
use bollard::models::{EndpointSettings, HostConfig, PortBinding};
use std::collections::HashMap;
use tierflow_core::{Port, Protocol};
use tierflow_pipeline::ContainerSpec;
use tierflow_pipeline::resource::{LABEL_PROJECT, LABEL_SERVICE};

/// "5000/tcp" 形式のポートキー
pub fn port_key(port: &Port) -> String {
    let protocol = if port.protocol == Protocol::Udp {
        "udp"
    } else {
        "tcp"
    };
    format!("{}/{}", port.container, protocol)
}

/// ContainerSpecをDockerのコンテナ設定に変換
pub fn spec_to_container_config(
    spec: &ContainerSpec,
) -> (Config<String>, CreateContainerOptions<String>) {
    // 環境変数の設定
    let env: Vec<String> = spec
        .environment
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    // ポートバインディングの設定
    let mut port_bindings = HashMap::new();
    let mut exposed_ports = HashMap::new();

    for port in &spec.ports {
        let container_port = port_key(port);
        exposed_ports.insert(container_port.clone(), HashMap::new());

        let host_ip = port.host_ip.as_deref().unwrap_or("0.0.0.0");
        port_bindings.insert(
            container_port,
            Some(vec![PortBinding {
                host_ip: Some(host_ip.to_string()),
                host_port: Some(port.host.to_string()),
            }]),
        );
    }

    // 名前付きボリュームのマウント
    let binds: Vec<String> = spec
        .mounts
        .iter()
        .map(|m| {
            let mode = if m.read_only { "ro" } else { "rw" };
            format!("{}:{}:{}", m.volume, m.path.display(), mode)
        })
        .collect();

    let host_config = Some(HostConfig {
        port_bindings: Some(port_bindings),
        binds: Some(binds),
        network_mode: Some(spec.network.clone()),
        ..Default::default()
    });

    // ラベル（フィンガープリント込み）
    let mut labels: HashMap<String, String> = spec.labels_with_fingerprint().into_iter().collect();
    if let Some(project) = spec.labels.get(LABEL_PROJECT) {
        labels.insert("com.docker.compose.project".to_string(), project.clone());
    }
    let service = spec.labels.get(LABEL_SERVICE).cloned();
    if let Some(service) = &service {
        labels.insert("com.docker.compose.service".to_string(), service.clone());
    }

    // サービス名でも名前解決できるようにエイリアスを付与
    let mut endpoints = HashMap::new();
    endpoints.insert(
        spec.network.clone(),
        EndpointSettings {
            aliases: service.map(|s| vec![s]),
            ..Default::default()
        },
    );
    let networking_config = Some(NetworkingConfig {
        endpoints_config: endpoints,
    });

    let config = Config {
        image: Some(spec.image.clone()),
        env: Some(env),
        exposed_ports: Some(exposed_ports),
        host_config,
        labels: Some(labels),
        cmd: spec
            .command
            .as_ref()
            .map(|c| c.split_whitespace().map(String::from).collect()),
        networking_config,
        ..Default::default()
    };

    let options = CreateContainerOptions {
        name: spec.name.clone(),
        platform: None,
    };

    (config, options)
}
