use crate::commands::deploy;
use crate::utils::{self, Project};
use colored::Colorize;
use tierflow_pipeline::{ActionType, StageSelector};
use tokio_util::sync::CancellationToken;

/// 全ステージをdry-runで実行し、変更内容をまとめて表示
pub async fn handle(project: &Project, cancel: CancellationToken) -> anyhow::Result<()> {
    utils::print_loaded_config_file(project);
    println!(
        "{}",
        format!("プロジェクト '{}' のプランを作成中...", project.deployment.name).blue()
    );
    println!();

    let (report, _) = deploy::execute(project, &StageSelector::all(), true, cancel).await?;
    if !report.is_success() {
        utils::print_failure(&report);
        anyhow::bail!("プランを作成できませんでした");
    }

    let plan = report.plan();
    let summary = plan.summary();
    println!();
    println!("{} {}", "プラン:".bold(), summary);

    let conflicts = plan.actions_by_type(ActionType::Conflict);
    if !conflicts.is_empty() {
        println!();
        println!("{}", "⚠ 自動で置き換えられないリソースがあります:".yellow());
        for action in conflicts {
            println!("  • {} ({})", action.resource_label(), action.description);
        }
    }

    if plan.has_changes() {
        println!();
        println!("適用するには {} を実行してください", "tier deploy".cyan());
    } else {
        println!("{}", "✓ 変更はありません".green().bold());
    }
    Ok(())
}
