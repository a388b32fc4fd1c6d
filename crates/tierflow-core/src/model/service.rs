//! サービス定義

use super::endpoint::{ReadinessPolicy, ServiceEndpoint};
use super::port::Port;
use super::volume::VolumeMount;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// デプロイ順序を決めるサービスの役割
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    /// 永続ボリュームを持つステートフルなサービス
    Database,
    /// ステートレスなAPIサービス
    Api,
    /// プレゼンテーション層
    Frontend,
}

impl ServiceRole {
    pub const ALL: [ServiceRole; 3] = [Self::Database, Self::Api, Self::Frontend];

    /// 文字列からパース
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "database" | "db" => Some(Self::Database),
            "api" | "backend" => Some(Self::Api),
            "frontend" | "web" => Some(Self::Frontend),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Api => "api",
            Self::Frontend => "frontend",
        }
    }

    /// 起動コストに応じたデフォルトのタイムアウト（秒）
    ///
    /// DBは起動が速く、APIは依存パッケージのインストール、
    /// フロントエンドはビルド工程を含むため長めに取る。
    pub fn default_timeout_secs(&self) -> u64 {
        match self {
            Self::Database => 60,
            Self::Api => 120,
            Self::Frontend => 300,
        }
    }
}

impl std::fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// サービス定義
///
/// KDL形式：
/// ```kdl
/// service "api" role="api" {
///     build context="backend"
///     port host=5000 container=5000
///     env {
///         MONGO_URI "mongodb://${database.host}:${database.container_port}/app"
///     }
///     config_file "backend/.env"
///     readiness timeout=120
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub role: ServiceRole,
    pub image: Option<String>,
    pub build: Option<BuildConfig>,
    pub container_name: Option<String>,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub mounts: Vec<VolumeMount>,
    pub command: Option<String>,
    /// レンダリング済みの環境変数を書き出すファイル（ソースツリーからの相対パス）
    pub config_file: Option<PathBuf>,
    pub readiness: Option<ReadinessConfig>,
}

impl Service {
    pub fn new(role: ServiceRole) -> Self {
        Self {
            role,
            image: None,
            build: None,
            container_name: None,
            ports: Vec::new(),
            environment: BTreeMap::new(),
            mounts: Vec::new(),
            command: None,
            config_file: None,
            readiness: None,
        }
    }

    /// 最初に公開されるホスト側ポート
    pub fn primary_host_port(&self) -> Option<u16> {
        self.ports.first().map(|p| p.host)
    }

    /// 最初に公開されるコンテナ側ポート
    pub fn primary_container_port(&self) -> Option<u16> {
        self.ports.first().map(|p| p.container)
    }

    /// 準備完了チェックの対象と待機ポリシーを解決
    ///
    /// ポートが一つも無く、readinessでも指定されていない場合はNone
    pub fn readiness_target(&self) -> Option<(ServiceEndpoint, ReadinessPolicy)> {
        let config = self.readiness.clone().unwrap_or_default();
        let port = config.port.or_else(|| self.primary_host_port())?;
        let host = config.host.unwrap_or_else(|| "127.0.0.1".to_string());
        let timeout = config
            .timeout_secs
            .unwrap_or_else(|| self.role.default_timeout_secs());
        let interval = config.interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS);

        Some((
            ServiceEndpoint::tcp(host, port),
            ReadinessPolicy::new(
                Duration::from_secs(timeout),
                Duration::from_millis(interval),
            ),
        ))
    }
}

/// デフォルトのポーリング間隔（ミリ秒）
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// ビルド設定
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// ビルドコンテキスト（ソースツリーからの相対パス）
    pub context: Option<PathBuf>,
    /// Dockerfileのパス（コンテキストからの相対パス）
    pub dockerfile: Option<PathBuf>,
    /// ビルド引数
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

/// 準備完了チェック設定
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub timeout_secs: Option<u64>,
    pub interval_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Protocol;

    fn api_with_port(host: u16) -> Service {
        let mut service = Service::new(ServiceRole::Api);
        service.ports.push(Port {
            host,
            container: 5000,
            protocol: Protocol::Tcp,
            host_ip: None,
        });
        service
    }

    #[test]
    fn test_role_parse_aliases() {
        assert_eq!(ServiceRole::parse("db"), Some(ServiceRole::Database));
        assert_eq!(ServiceRole::parse("Backend"), Some(ServiceRole::Api));
        assert_eq!(ServiceRole::parse("web"), Some(ServiceRole::Frontend));
        assert_eq!(ServiceRole::parse("cache"), None);
    }

    #[test]
    fn test_readiness_target_defaults_to_first_host_port() {
        let service = api_with_port(5000);
        let (endpoint, policy) = service.readiness_target().unwrap();

        assert_eq!(endpoint, ServiceEndpoint::tcp("127.0.0.1", 5000));
        assert_eq!(policy.timeout, Duration::from_secs(120));
        assert_eq!(policy.interval, Duration::from_millis(1000));
    }

    #[test]
    fn test_readiness_target_override() {
        let mut service = api_with_port(5000);
        service.readiness = Some(ReadinessConfig {
            host: Some("10.0.0.5".to_string()),
            port: Some(8081),
            timeout_secs: Some(15),
            interval_ms: Some(250),
        });

        let (endpoint, policy) = service.readiness_target().unwrap();
        assert_eq!(endpoint.address(), "10.0.0.5:8081");
        assert_eq!(policy.timeout, Duration::from_secs(15));
        assert_eq!(policy.interval, Duration::from_millis(250));
    }

    #[test]
    fn test_readiness_target_without_ports() {
        let service = Service::new(ServiceRole::Frontend);
        assert!(service.readiness_target().is_none());
    }

    #[test]
    fn test_distinct_default_timeouts() {
        let timeouts: Vec<u64> = ServiceRole::ALL
            .iter()
            .map(|r| r.default_timeout_secs())
            .collect();
        assert_eq!(timeouts, vec![60, 120, 300]);
    }
}
