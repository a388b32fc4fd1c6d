//! Desired and observed resource descriptions

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tierflow_core::{Port, VolumeMount};

/// Label carrying the spec fingerprint on managed containers
pub const LABEL_FINGERPRINT: &str = "tierflow.fingerprint";
pub const LABEL_PROJECT: &str = "tierflow.project";
pub const LABEL_SERVICE: &str = "tierflow.service";
pub const LABEL_ROLE: &str = "tierflow.role";

/// Declarative description of one deployable service instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub ports: Vec<Port>,
    pub network: String,
    /// Fully resolved environment handed to the container
    pub environment: BTreeMap<String, String>,
    /// Keys whose value comes from the vault, mapped to the sealed value's digest
    #[serde(default)]
    pub secret_digests: BTreeMap<String, String>,
    pub mounts: Vec<VolumeMount>,
    pub command: Option<String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    image: &'a str,
    ports: &'a [Port],
    network: &'a str,
    environment: BTreeMap<&'a str, &'a str>,
    mounts: &'a [VolumeMount],
    command: Option<&'a str>,
    labels: &'a BTreeMap<String, String>,
}

impl ContainerSpec {
    /// SHA-256 over everything that shapes the running container
    ///
    /// Secret values never enter the hash; their vault digest does, so a
    /// rotated secret changes the fingerprint without exposing the value.
    pub fn fingerprint(&self) -> String {
        let environment = self
            .environment
            .iter()
            .map(|(key, value)| {
                let value = self
                    .secret_digests
                    .get(key)
                    .map(String::as_str)
                    .unwrap_or(value.as_str());
                (key.as_str(), value)
            })
            .collect();

        let input = FingerprintInput {
            image: &self.image,
            ports: &self.ports,
            network: &self.network,
            environment,
            mounts: &self.mounts,
            command: self.command.as_deref(),
            labels: &self.labels,
        };

        // Only ordered maps and vectors, so the encoding is deterministic
        let encoded = serde_json::to_vec(&input).unwrap_or_default();
        format!("{:x}", Sha256::digest(&encoded))
    }

    /// Labels to set on the container, including the fingerprint
    pub fn labels_with_fingerprint(&self) -> BTreeMap<String, String> {
        let mut labels = self.labels.clone();
        labels.insert(LABEL_FINGERPRINT.to_string(), self.fingerprint());
        labels
    }
}

/// Image build request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Absolute path of the build context
    pub context: PathBuf,
    /// Dockerfile path relative to the context
    pub dockerfile: Option<PathBuf>,
    pub tag: String,
    pub args: BTreeMap<String, String>,
}

/// Network as seen by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedNetwork {
    pub name: String,
    pub driver: String,
}

/// Volume as seen by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedVolume {
    pub name: String,
    pub driver: String,
}

/// Container as seen by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObservedContainer {
    pub id: String,
    pub name: String,
    pub image_id: Option<String>,
    pub running: bool,
    pub fingerprint: Option<String>,
    pub networks: Vec<String>,
}

/// Checkout directory state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedSource {
    pub exists: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierflow_core::Protocol;

    fn spec() -> ContainerSpec {
        let mut environment = BTreeMap::new();
        environment.insert("NODE_ENV".to_string(), "production".to_string());
        ContainerSpec {
            name: "shop-api".to_string(),
            image: "shop-api:latest".to_string(),
            ports: vec![Port {
                host: 5000,
                container: 5000,
                protocol: Protocol::Tcp,
                host_ip: None,
            }],
            network: "appnet".to_string(),
            environment,
            secret_digests: BTreeMap::new(),
            mounts: Vec::new(),
            command: None,
            labels: BTreeMap::new(),
        }
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(spec().fingerprint(), spec().fingerprint());
        assert_eq!(spec().fingerprint().len(), 64);
    }

    #[test]
    fn test_fingerprint_tracks_image_and_env() {
        let base = spec().fingerprint();

        let mut changed = spec();
        changed.image = "shop-api:v2".to_string();
        assert_ne!(changed.fingerprint(), base);

        let mut changed = spec();
        changed
            .environment
            .insert("NODE_ENV".to_string(), "development".to_string());
        assert_ne!(changed.fingerprint(), base);
    }

    #[test]
    fn test_fingerprint_masks_secret_values() {
        let mut resolved = spec();
        resolved
            .environment
            .insert("DB_PASSWORD".to_string(), "hunter2".to_string());
        resolved
            .secret_digests
            .insert("DB_PASSWORD".to_string(), "digest-1".to_string());

        // a dry run sees the unresolved reference
        let mut planned = resolved.clone();
        planned
            .environment
            .insert("DB_PASSWORD".to_string(), "vault://db_password".to_string());

        assert_eq!(resolved.fingerprint(), planned.fingerprint());

        planned
            .secret_digests
            .insert("DB_PASSWORD".to_string(), "digest-2".to_string());
        assert_ne!(resolved.fingerprint(), planned.fingerprint());
    }

    #[test]
    fn test_labels_with_fingerprint() {
        let labels = spec().labels_with_fingerprint();
        assert_eq!(labels[LABEL_FINGERPRINT], spec().fingerprint());
    }
}
