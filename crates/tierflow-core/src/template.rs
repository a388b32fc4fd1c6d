//! テンプレート展開機能
//!
//! 2段階で展開を行います。
//!
//! 1. 読み込み時: Teraで設定ファイル全体を展開（`{{ variable }}`）
//! 2. 適用時: `${database.host}` のようなプレースホルダをデプロイ構成から解決

use crate::error::{Result, TierError};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::OnceLock;
use tera::{Context, Tera};
use tracing::{debug, warn};

/// 変数コンテキスト
pub type Variables = HashMap<String, serde_json::Value>;

/// テンプレートに渡す環境変数のプレフィックス
const ENV_PREFIX: &str = "TIER_";

/// テンプレートプロセッサ
pub struct TemplateProcessor {
    tera: Tera,
    context: Context,
}

impl TemplateProcessor {
    pub fn new() -> Self {
        Self {
            tera: Tera::default(),
            context: Context::new(),
        }
    }

    /// 変数を追加
    pub fn add_variable(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.context.insert(key.into(), &value);
    }

    /// 複数の変数を追加
    pub fn add_variables(&mut self, variables: Variables) {
        for (key, value) in variables {
            self.context.insert(key, &value);
        }
    }

    /// `TIER_` で始まる環境変数のみを追加
    ///
    /// ホストの認証情報などがテンプレートに漏れないよう、それ以外は渡さない
    pub fn add_env_variables(&mut self) {
        let mut count = 0;
        for (key, value) in std::env::vars() {
            if key.starts_with(ENV_PREFIX) {
                debug!(key = %key, "Adding environment variable");
                self.context.insert(key, &serde_json::Value::String(value));
                count += 1;
            }
        }
        debug!(env_var_count = count, "Added filtered environment variables");
    }

    /// 文字列をテンプレートとして展開
    pub fn render_str(&mut self, template: &str) -> Result<String> {
        self.tera
            .render_str(template, &self.context)
            .map_err(|e| TierError::TemplateRenderError(extract_tera_error_detail(&e)))
    }

    /// ファイルを読み込んでテンプレート展開
    pub fn render_file(&mut self, path: &Path) -> Result<String> {
        let content = std::fs::read_to_string(path).map_err(|e| TierError::IoError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        self.render_str(&content).map_err(|e| match e {
            TierError::TemplateRenderError(message) => TierError::TemplateError {
                file: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }
}

impl Default for TemplateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Teraのエラーチェーンから原因を取り出す
///
/// Teraのトップレベルのメッセージは "Failed to render '__tera_one_off'" だけなので、
/// sourceを辿って実際の原因（未定義変数など）を連結する
fn extract_tera_error_detail(error: &tera::Error) -> String {
    let mut messages = vec![error.to_string()];
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        messages.push(cause.to_string());
        source = cause.source();
    }
    messages.join(": ")
}

/// KDLから `variables { ... }` ブロックを抽出
///
/// テンプレート構文を含むためKDLとして解釈できない場合は空を返す
pub fn extract_variables(kdl_content: &str) -> Variables {
    let doc: kdl::KdlDocument = match kdl_content.parse() {
        Ok(doc) => doc,
        Err(e) => {
            debug!(error = %e, "variables block skipped: file is not plain KDL before rendering");
            return HashMap::new();
        }
    };

    let mut variables = HashMap::new();
    for node in doc.nodes() {
        if node.name().value() != "variables" {
            continue;
        }
        let Some(children) = node.children() else {
            continue;
        };
        for var_node in children.nodes() {
            if let Some(entry) = var_node.entries().first() {
                variables.insert(
                    var_node.name().value().to_string(),
                    kdl_value_to_json(entry.value()),
                );
            }
        }
    }
    variables
}

fn kdl_value_to_json(value: &kdl::KdlValue) -> serde_json::Value {
    if let Some(s) = value.as_string() {
        serde_json::Value::String(s.to_string())
    } else if let Some(i) = value.as_integer() {
        serde_json::Value::Number((i as i64).into())
    } else if let Some(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    } else if let Some(b) = value.as_bool() {
        serde_json::Value::Bool(b)
    } else {
        serde_json::Value::Null
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}").expect("placeholder pattern is valid")
    })
}

/// `${key}` 形式のプレースホルダを展開
///
/// 未知のキーは警告を出してそのまま残す
pub fn expand_placeholders(value: &str, scope: &BTreeMap<String, String>) -> String {
    placeholder_pattern()
        .replace_all(value, |caps: &regex::Captures| {
            let key = &caps[1];
            match scope.get(key) {
                Some(resolved) => resolved.clone(),
                None => {
                    warn!(placeholder = %key, "unresolved placeholder left as-is");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// 文字列に未解決のプレースホルダが含まれるか
pub fn has_placeholders(value: &str) -> bool {
    placeholder_pattern().is_match(value)
}
