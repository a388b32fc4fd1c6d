//! Deployment定義

use super::host::HostConfig;
use super::service::{Service, ServiceRole};
use super::source::SourceConfig;
use super::volume::VolumeSpec;
use crate::error::{Result, TierError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Deployment - 3層アプリケーションの設計図
///
/// ホスト準備、ソース取得、ネットワーク、各サービスの定義をまとめたもの。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// アプリケーション名（プロジェクト名）
    pub name: String,
    #[serde(default)]
    pub host: HostConfig,
    pub source: Option<SourceConfig>,
    pub network: NetworkSpec,
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
    /// サービス名 → サービス定義
    pub services: HashMap<String, Service>,
    /// 設定ファイル内の共通変数
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

/// 仮想ネットワーク
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    pub driver: String,
}

impl NetworkSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: "bridge".to_string(),
        }
    }
}

impl Deployment {
    /// roleに対応するサービスを取得
    pub fn service_by_role(&self, role: ServiceRole) -> Result<(&str, &Service)> {
        let mut matches: Vec<(&String, &Service)> = self
            .services
            .iter()
            .filter(|(_, s)| s.role == role)
            .collect();
        // HashMapの順序に依存しないよう名前順
        matches.sort_by(|a, b| a.0.cmp(b.0));
        matches
            .into_iter()
            .next()
            .map(|(name, service)| (name.as_str(), service))
            .ok_or_else(|| TierError::MissingRole(role.to_string()))
    }

    /// コンテナ名を決定（未指定なら "{project}-{service}"）
    pub fn container_name(&self, service_name: &str) -> String {
        self.services
            .get(service_name)
            .and_then(|s| s.container_name.clone())
            .unwrap_or_else(|| format!("{}-{}", self.name, service_name))
    }

    /// イメージ参照を決定
    ///
    /// 1. imageにタグが含まれている場合（":"を含む）はそのまま使用
    /// 2. imageのみでタグがない場合は "image:latest"
    /// 3. imageが無い場合は "{project}-{service}:latest"（ビルド前提）
    pub fn image_ref(&self, service_name: &str) -> Result<String> {
        let service = self
            .services
            .get(service_name)
            .ok_or_else(|| TierError::ServiceNotFound(service_name.to_string()))?;

        let image = match &service.image {
            Some(img) if has_tag(img) => img.clone(),
            Some(img) => format!("{}:latest", img),
            None => format!("{}-{}:latest", self.name, service_name),
        };
        Ok(image)
    }

    /// 実行時に展開できる `${...}` プレースホルダの値
    pub fn placeholder_scope(&self) -> BTreeMap<String, String> {
        let mut scope = BTreeMap::new();
        scope.insert("project".to_string(), self.name.clone());
        scope.insert("network".to_string(), self.network.name.clone());

        for role in ServiceRole::ALL {
            let Ok((name, service)) = self.service_by_role(role) else {
                continue;
            };
            let prefix = role.as_str();
            // 同一ネットワーク内ではコンテナ名で名前解決できる
            scope.insert(format!("{}.host", prefix), self.container_name(name));
            scope.insert(format!("{}.name", prefix), name.to_string());
            if let Some(port) = service.primary_host_port() {
                scope.insert(format!("{}.port", prefix), port.to_string());
            }
            if let Some(port) = service.primary_container_port() {
                scope.insert(format!("{}.container_port", prefix), port.to_string());
            }
        }

        scope
    }
}

/// レジストリのポート指定 (localhost:5000/app) とタグを区別する
fn has_tag(image: &str) -> bool {
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    last_segment.contains(':')
}
