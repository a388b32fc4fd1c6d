use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error(
        "設定ファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: tier.kdl, tier.local.kdl, .tier.kdl, .tier.local.kdl\n\
        - ./.tierflow/ ディレクトリ\n\
        - ~/.config/tierflow/tier.kdl\n\
        または TIER_CONFIG_PATH 環境変数で直接指定できます"
    )]
    DeployFileNotFound,

    #[error("TIER_CONFIG_PATH が存在しないファイルを指しています: {0}")]
    ConfigPathMissing(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
