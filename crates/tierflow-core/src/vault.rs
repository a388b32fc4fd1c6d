//! シークレットVault
//!
//! 環境変数の値を `vault://name` 形式で参照できるようにする。
//! 値はAES-256-GCMで暗号化してJSONファイルに保存し、適用時に復号する。

use crate::error::{Result, TierError};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// 鍵を渡す環境変数
pub const VAULT_KEY_ENV: &str = "TIER_VAULT_KEY";

/// 参照のプレフィックス
pub const VAULT_REFERENCE_PREFIX: &str = "vault://";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const VAULT_FORMAT_VERSION: u32 = 1;

/// 256bitの暗号鍵
#[derive(Clone)]
pub struct VaultKey([u8; KEY_LEN]);

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultKey(**redacted**)")
    }
}

impl VaultKey {
    /// 新しい鍵を生成
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(key.as_slice());
        Self(bytes)
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| TierError::Vault(format!("鍵のBase64デコードに失敗: {}", e)))?;
        let bytes: [u8; KEY_LEN] = decoded.try_into().map_err(|v: Vec<u8>| {
            TierError::Vault(format!(
                "鍵の長さが不正です（{}バイト、期待値{}バイト）",
                v.len(),
                KEY_LEN
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// 鍵を読み込む
    ///
    /// 1. 環境変数 `TIER_VAULT_KEY`
    /// 2. 鍵ファイル
    pub fn load(key_file: Option<&Path>) -> Result<Self> {
        if let Ok(encoded) = std::env::var(VAULT_KEY_ENV) {
            if !encoded.trim().is_empty() {
                tracing::debug!("Vault key loaded from {}", VAULT_KEY_ENV);
                return Self::from_base64(&encoded);
            }
        }

        match key_file {
            Some(path) if path.exists() => {
                let encoded = std::fs::read_to_string(path).map_err(|e| TierError::IoError {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                tracing::debug!(path = %path.display(), "Vault key loaded from file");
                Self::from_base64(&encoded)
            }
            _ => Err(TierError::VaultKeyMissing),
        }
    }

    /// 鍵ファイルに書き出す（所有者のみ読み書き可）
    pub fn write_to(&self, path: &Path) -> Result<()> {
        write_private(path, &format!("{}\n", self.to_base64()))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

/// 暗号化済みの値
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedSecret {
    nonce: String,
    ciphertext: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct VaultFile {
    version: u32,
    #[serde(default)]
    secrets: BTreeMap<String, SealedSecret>,
}

/// シークレットの保管庫
#[derive(Debug)]
pub struct Vault {
    path: PathBuf,
    key: VaultKey,
    secrets: BTreeMap<String, SealedSecret>,
}

impl Vault {
    /// Vaultファイルを開く（存在しなければ空）
    pub fn open(path: impl Into<PathBuf>, key: VaultKey) -> Result<Self> {
        let path = path.into();
        let secrets = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| TierError::IoError {
                path: path.clone(),
                message: e.to_string(),
            })?;
            let file: VaultFile = serde_json::from_str(&content)?;
            if file.version != VAULT_FORMAT_VERSION {
                return Err(TierError::Vault(format!(
                    "未対応のVaultバージョン: {}",
                    file.version
                )));
            }
            file.secrets
        } else {
            BTreeMap::new()
        };

        Ok(Self { path, key, secrets })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 値を暗号化して登録（同名は上書き）
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        validate_name(name)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .key
            .cipher()
            .encrypt(&nonce, value.as_bytes())
            .map_err(|_| TierError::Vault(format!("'{}' の暗号化に失敗しました", name)))?;

        self.secrets.insert(
            name.to_string(),
            SealedSecret {
                nonce: STANDARD.encode(nonce),
                ciphertext: STANDARD.encode(ciphertext),
            },
        );
        Ok(())
    }

    /// 値を復号して取得
    pub fn get(&self, name: &str) -> Result<String> {
        let sealed = self
            .secrets
            .get(name)
            .ok_or_else(|| TierError::SecretNotFound(name.to_string()))?;

        let nonce_bytes = STANDARD
            .decode(&sealed.nonce)
            .map_err(|e| TierError::Vault(format!("'{}' のnonceが不正です: {}", name, e)))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(TierError::Vault(format!("'{}' のnonce長が不正です", name)));
        }
        let ciphertext = STANDARD
            .decode(&sealed.ciphertext)
            .map_err(|e| TierError::Vault(format!("'{}' の暗号文が不正です: {}", name, e)))?;

        let plaintext = self
            .key
            .cipher()
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| {
                TierError::Vault(format!(
                    "'{}' の復号に失敗しました（鍵が一致しない可能性があります）",
                    name
                ))
            })?;

        String::from_utf8(plaintext)
            .map_err(|_| TierError::Vault(format!("'{}' はUTF-8文字列ではありません", name)))
    }

    /// 暗号文のダイジェスト（復号せずに値の変更を検出する）
    pub fn digest(&self, name: &str) -> Result<String> {
        let sealed = self
            .secrets
            .get(name)
            .ok_or_else(|| TierError::SecretNotFound(name.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(sealed.nonce.as_bytes());
        hasher.update(sealed.ciphertext.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// 登録済みの名前（値は返さない）
    pub fn names(&self) -> Vec<&str> {
        self.secrets.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.secrets.contains_key(name)
    }

    /// 削除。存在しなかった場合はfalse
    pub fn remove(&mut self, name: &str) -> bool {
        self.secrets.remove(name).is_some()
    }

    /// ファイルに保存
    pub fn save(&self) -> Result<()> {
        let file = VaultFile {
            version: VAULT_FORMAT_VERSION,
            secrets: self.secrets.clone(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        write_private(&self.path, &content)
    }
}

/// 値が `vault://name` 参照か
pub fn is_vault_reference(value: &str) -> bool {
    value.starts_with(VAULT_REFERENCE_PREFIX)
}

/// `vault://name` から名前部分を取り出す
pub fn reference_name(value: &str) -> Option<&str> {
    value
        .strip_prefix(VAULT_REFERENCE_PREFIX)
        .filter(|name| !name.is_empty())
}

/// 環境変数マップに含まれるVault参照を解決
///
/// 参照が一つも無ければVaultは不要
pub fn resolve_environment(
    environment: &BTreeMap<String, String>,
    vault: Option<&Vault>,
) -> Result<BTreeMap<String, String>> {
    let mut resolved = BTreeMap::new();
    for (key, value) in environment {
        let value = match reference_name(value) {
            Some(name) => {
                let vault = vault.ok_or(TierError::VaultKeyMissing)?;
                vault.get(name)?
            }
            None if is_vault_reference(value) => {
                return Err(TierError::Vault(format!(
                    "{} の参照にシークレット名がありません",
                    key
                )));
            }
            None => value.clone(),
        };
        resolved.insert(key.clone(), value);
    }
    Ok(resolved)
}

/// 環境変数マップがVault参照を含むか
pub fn references_vault(environment: &BTreeMap<String, String>) -> bool {
    environment.values().any(|v| is_vault_reference(v))
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(TierError::Vault(format!(
            "シークレット名 '{}' は英数字と _ - . のみ使用できます",
            name
        )))
    }
}

fn write_private(path: &Path, content: &str) -> Result<()> {
    let io_err = |e: std::io::Error| TierError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, content).map_err(io_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(io_err)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn vault_in(dir: &TempDir, key: VaultKey) -> Vault {
        Vault::open(dir.path().join(".tierflow/secrets.vault"), key).unwrap()
    }

    #[test]
    fn test_set_get_roundtrip_through_file() {
        let dir = TempDir::new().unwrap();
        let key = VaultKey::generate();

        let mut vault = vault_in(&dir, key.clone());
        vault.set("db_password", "s3cr3t").unwrap();
        vault.save().unwrap();

        let raw = std::fs::read_to_string(vault.path()).unwrap();
        assert!(!raw.contains("s3cr3t"));

        let reopened = vault_in(&dir, key);
        assert_eq!(reopened.get("db_password").unwrap(), "s3cr3t");
        assert_eq!(reopened.names(), vec!["db_password"]);
    }

    #[test]
    fn test_wrong_key_fails_to_decrypt() {
        let dir = TempDir::new().unwrap();
        let mut vault = vault_in(&dir, VaultKey::generate());
        vault.set("token", "abc").unwrap();
        vault.save().unwrap();

        let other = vault_in(&dir, VaultKey::generate());
        assert!(matches!(other.get("token"), Err(TierError::Vault(_))));
    }

    #[test]
    fn test_missing_secret() {
        let dir = TempDir::new().unwrap();
        let vault = vault_in(&dir, VaultKey::generate());
        assert!(matches!(
            vault.get("nope"),
            Err(TierError::SecretNotFound(_))
        ));
    }

    #[test]
    fn test_digest_changes_when_value_is_reset() {
        let dir = TempDir::new().unwrap();
        let mut vault = vault_in(&dir, VaultKey::generate());
        vault.set("a", "1").unwrap();
        let first = vault.digest("a").unwrap();
        assert_eq!(first, vault.digest("a").unwrap());

        vault.set("a", "1").unwrap();
        assert_ne!(first, vault.digest("a").unwrap());
        assert!(vault.digest("b").is_err());
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let mut vault = vault_in(&dir, VaultKey::generate());
        vault.set("a", "1").unwrap();
        assert!(vault.remove("a"));
        assert!(!vault.remove("a"));
        assert!(!vault.contains("a"));
    }

    #[test]
    fn test_invalid_name() {
        let dir = TempDir::new().unwrap();
        let mut vault = vault_in(&dir, VaultKey::generate());
        assert!(vault.set("bad name", "x").is_err());
        assert!(vault.set("", "x").is_err());
    }

    #[test]
    fn test_key_base64_roundtrip_and_length_check() {
        let key = VaultKey::generate();
        let restored = VaultKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(restored.to_base64(), key.to_base64());

        let short = STANDARD.encode([0u8; 16]);
        assert!(VaultKey::from_base64(&short).is_err());
        assert!(!format!("{:?}", key).contains(&key.to_base64()));
    }

    #[test]
    #[serial]
    fn test_key_load_prefers_env() {
        let dir = TempDir::new().unwrap();
        let file_key = VaultKey::generate();
        let key_path = dir.path().join("vault.key");
        file_key.write_to(&key_path).unwrap();

        let env_key = VaultKey::generate();
        temp_env::with_var(VAULT_KEY_ENV, Some(env_key.to_base64()), || {
            let loaded = VaultKey::load(Some(&key_path)).unwrap();
            assert_eq!(loaded.to_base64(), env_key.to_base64());
        });

        temp_env::with_var_unset(VAULT_KEY_ENV, || {
            let loaded = VaultKey::load(Some(&key_path)).unwrap();
            assert_eq!(loaded.to_base64(), file_key.to_base64());

            assert!(matches!(
                VaultKey::load(Some(&dir.path().join("absent.key"))),
                Err(TierError::VaultKeyMissing)
            ));
        });
    }

    #[test]
    fn test_resolve_environment() {
        let dir = TempDir::new().unwrap();
        let mut vault = vault_in(&dir, VaultKey::generate());
        vault.set("mongo_password", "pw").unwrap();

        let mut env = BTreeMap::new();
        env.insert("MONGO_PASSWORD".to_string(), "vault://mongo_password".to_string());
        env.insert("NODE_ENV".to_string(), "production".to_string());

        assert!(references_vault(&env));
        let resolved = resolve_environment(&env, Some(&vault)).unwrap();
        assert_eq!(resolved["MONGO_PASSWORD"], "pw");
        assert_eq!(resolved["NODE_ENV"], "production");
    }

    #[test]
    fn test_resolve_without_vault() {
        let mut env = BTreeMap::new();
        env.insert("PLAIN".to_string(), "value".to_string());
        assert_eq!(resolve_environment(&env, None).unwrap()["PLAIN"], "value");

        env.insert("SECRET".to_string(), "vault://x".to_string());
        assert!(matches!(
            resolve_environment(&env, None),
            Err(TierError::VaultKeyMissing)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_vault_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let vault = vault_in(&dir, VaultKey::generate());
        vault.save().unwrap();
        let mode = std::fs::metadata(vault.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
