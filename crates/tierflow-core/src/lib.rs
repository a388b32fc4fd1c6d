//! tierflow core
//!
//! 3層アプリケーション（DB / API / フロントエンド）のデプロイ構成を
//! KDLで記述し、読み込み・検証するためのクレート。

pub mod error;
pub mod loader;
pub mod model;
pub mod parser;
pub mod template;
pub mod vault;

pub use error::{Result, TierError};
pub use loader::{load_deployment, load_deployment_str, validate_deployment};
pub use model::*;
pub use parser::{parse_kdl_file, parse_kdl_string};
pub use template::{TemplateProcessor, expand_placeholders, has_placeholders};
pub use vault::{Vault, VaultKey};
