use std::path::PathBuf;
use thiserror::Error;
use tierflow_pipeline::ToolError;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error(
        "Dockerに接続できません: {0}\n\nヒント:\n  • Dockerデーモンが起動しているか確認してください\n  • 実行ユーザーがdockerグループに所属しているか確認してください"
    )]
    DockerConnectionFailed(String),

    #[error("Docker APIエラー: {0}")]
    DockerApiError(String),

    #[error("イメージ '{image}' の取得に失敗しました: {message}")]
    PullFailed { image: String, message: String },

    #[error("イメージ '{tag}' のビルドに失敗しました: {message}")]
    BuildFailed { tag: String, message: String },

    #[error("ビルドコンテキストが見つかりません: {0}")]
    ContextNotFound(PathBuf),

    #[error("Dockerfileが見つかりません: {0}")]
    DockerfileNotFound(PathBuf),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bollard::errors::Error> for ContainerError {
    fn from(err: bollard::errors::Error) -> Self {
        let err_str = err.to_string();
        match &err {
            bollard::errors::Error::DockerResponseServerError { .. } => {
                ContainerError::DockerApiError(err_str)
            }
            _ => {
                // ソケットに到達できない場合は接続エラーとして案内する
                if err_str.contains("Connection refused")
                    || err_str.contains("No such file or directory")
                    || err_str.contains("Permission denied")
                {
                    ContainerError::DockerConnectionFailed(err_str)
                } else {
                    ContainerError::DockerApiError(err_str)
                }
            }
        }
    }
}

/// パイプラインにはメッセージをそのまま渡す
impl From<ContainerError> for ToolError {
    fn from(err: ContainerError) -> Self {
        ToolError::new(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ContainerError>;

/// 404を「存在しない」として扱う
pub(crate) fn not_found_as_none<T>(
    result: std::result::Result<T, bollard::errors::Error>,
) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
