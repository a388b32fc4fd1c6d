use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TierError {
    #[error("KDLパースエラー: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("ファイル読み込みエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO エラー: {path}\n理由: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("無効な設定: {0}")]
    InvalidConfig(String),

    #[error("テンプレートエラー: {file}\n理由: {message}")]
    TemplateError { file: PathBuf, message: String },

    #[error("テンプレート展開エラー: {0}")]
    TemplateRenderError(String),

    #[error("サービスが見つかりません: {0}")]
    ServiceNotFound(String),

    #[error("role '{0}' のサービスが定義されていません")]
    MissingRole(String),

    #[error(
        "Vault の鍵が見つかりません\nヒント: tier secret keygen で鍵を生成するか、TIER_VAULT_KEY を設定してください"
    )]
    VaultKeyMissing,

    #[error("Vault エラー: {0}")]
    Vault(String),

    #[error("シークレット '{0}' が Vault に存在しません")]
    SecretNotFound(String),

    #[error("JSON エラー: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TierError>;
