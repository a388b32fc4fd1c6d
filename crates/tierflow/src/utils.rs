use colored::Colorize;
use std::path::{Path, PathBuf};
use tierflow_core::{Deployment, ServiceRole, TierError, Vault, VaultKey};
use tierflow_pipeline::{ActionType, RunReport, StageOutcome};

/// 読み込み済みのプロジェクト
pub struct Project {
    pub deploy_file: PathBuf,
    pub root: PathBuf,
    pub deployment: Deployment,
}

/// 設定ファイルを探してプロジェクトのルートを決める（パースはしない）
pub fn locate_project() -> anyhow::Result<(PathBuf, PathBuf)> {
    let deploy_file = tierflow_config::find_deploy_file()?;
    let deploy_file = deploy_file.canonicalize().unwrap_or(deploy_file);
    let root = tierflow_config::project_root_for(&deploy_file);
    Ok((deploy_file, root))
}

/// 設定ファイルを探して読み込む
pub fn load_project() -> anyhow::Result<Project> {
    let (deploy_file, root) = locate_project()?;
    tracing::debug!(path = %deploy_file.display(), "Loading deployment");
    let deployment = tierflow_core::load_deployment(&deploy_file)?;
    Ok(Project {
        deploy_file,
        root,
        deployment,
    })
}

/// プロジェクトのVaultを開く
///
/// 鍵が見つからない場合はNone（Vault参照を使わない構成では鍵は不要）
pub fn open_vault(project_root: &Path) -> anyhow::Result<Option<Vault>> {
    let key_path = tierflow_config::vault_key_path()?;
    match VaultKey::load(Some(&key_path)) {
        Ok(key) => Ok(Some(Vault::open(
            tierflow_config::vault_path(project_root),
            key,
        )?)),
        Err(TierError::VaultKeyMissing) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// 鍵が必須のコマンド用
pub fn require_vault(project_root: &Path) -> anyhow::Result<Vault> {
    open_vault(project_root)?.ok_or_else(|| TierError::VaultKeyMissing.into())
}

pub fn print_loaded_config_file(project: &Project) {
    println!(
        "📄 設定ファイル: {}",
        project.deploy_file.display().to_string().cyan()
    );
}

fn action_symbol(action_type: ActionType) -> colored::ColoredString {
    match action_type {
        ActionType::Create => "+".green().bold(),
        ActionType::Replace => "~".yellow().bold(),
        ActionType::Start => "▶".cyan().bold(),
        ActionType::NoOp => "=".dimmed(),
        ActionType::Conflict => "!".red().bold(),
    }
}

/// 1ステージ分の結果を表示
pub fn print_stage_outcome(ordinal: u8, name: &str, outcome: &StageOutcome) {
    let position = format!("[{}/6]", ordinal);
    match outcome {
        StageOutcome::Applied(output) => {
            println!("{} {} {}", "✓".green().bold(), position.dimmed(), name.bold());
            for action in &output.actions {
                let line = format!(
                    "{} {}",
                    action.resource_label(),
                    format!("({})", action.description).dimmed()
                );
                if action.action_type.is_change() {
                    println!("    {} {}", action_symbol(action.action_type), line);
                } else {
                    println!("    {} {}", action_symbol(action.action_type), line.dimmed());
                }
            }
            for note in &output.notes {
                println!("    {} {}", "ℹ".blue(), note);
            }
        }
        StageOutcome::Skipped => {
            println!(
                "{} {} {} {}",
                "-".dimmed(),
                position.dimmed(),
                name.dimmed(),
                "(スキップ)".dimmed()
            );
        }
        StageOutcome::Failed(e) => {
            println!("{} {} {}", "✗".red().bold(), position.dimmed(), name.bold());
            println!("    {}", e.to_string().red());
        }
        StageOutcome::NotRun => {
            println!(
                "{} {} {} {}",
                "·".dimmed(),
                position.dimmed(),
                name.dimmed(),
                "(未実行)".dimmed()
            );
        }
    }
}

/// 失敗時のサマリー（最後に完了したステージと最初に失敗したステージ）
pub fn print_failure(report: &RunReport) {
    let Some((failed, error)) = report.first_failed() else {
        return;
    };

    eprintln!();
    eprintln!("{}", "✗ デプロイに失敗しました".red().bold());
    eprintln!();
    eprintln!("  失敗したステージ: {}", failed.name.red().bold());
    let last = report
        .last_completed()
        .map(|d| d.name.as_str())
        .unwrap_or("(なし)");
    eprintln!("  最後に完了したステージ: {}", last.cyan());
    eprintln!();
    eprintln!("{}", "原因:".yellow());
    eprintln!("  {}", error);

    let not_run: Vec<&str> = report
        .stages
        .iter()
        .filter(|s| matches!(s.outcome, StageOutcome::NotRun))
        .map(|s| s.descriptor.name.as_str())
        .collect();
    if !not_run.is_empty() {
        eprintln!();
        eprintln!("  未実行: {}", not_run.join(", ").dimmed());
    }
    eprintln!();
    eprintln!(
        "{}",
        "ヒント: 完了したステージのリソースはそのまま残っています。原因を解消して再実行してください"
            .dimmed()
    );
}

/// APIとフロントエンドのアクセス先を表示
pub fn print_endpoints(deployment: &Deployment) {
    let mut lines = Vec::new();
    for role in [ServiceRole::Api, ServiceRole::Frontend] {
        let Ok((name, service)) = deployment.service_by_role(role) else {
            continue;
        };
        if let Some((endpoint, _)) = service.readiness_target() {
            lines.push(format!(
                "  {:<10} http://{}  {}",
                role.to_string(),
                endpoint.address().cyan(),
                format!("({})", deployment.container_name(name)).dimmed()
            ));
        }
    }

    if lines.is_empty() {
        return;
    }
    println!();
    println!("{}", "アクセス先:".bold());
    for line in lines {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_symbols_are_distinct() {
        let symbols: Vec<String> = [
            ActionType::Create,
            ActionType::Replace,
            ActionType::Start,
            ActionType::NoOp,
            ActionType::Conflict,
        ]
        .into_iter()
        .map(|t| action_symbol(t).to_string())
        .collect();

        for (i, a) in symbols.iter().enumerate() {
            for b in &symbols[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
