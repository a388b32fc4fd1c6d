use crate::utils::{self, Project};
use colored::Colorize;
use tierflow_pipeline::{Ledger, StageStatus, stage_descriptors};

/// ステージの一覧（順序、タグ、台帳上の状態）を表示
pub async fn handle(project: &Project) -> anyhow::Result<()> {
    utils::print_loaded_config_file(project);
    let ledger = Ledger::load(&project.root).await?;

    println!();
    println!("{}", format!("ステージ ({})", project.deployment.name).bold());
    for descriptor in stage_descriptors(&project.deployment) {
        let status = match ledger.record_of(descriptor.id) {
            Some(record) => {
                let at = record.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string();
                match record.status {
                    StageStatus::Applied => format!("{} {}", "適用済み".green(), at.dimmed()),
                    StageStatus::Failed => format!("{} {}", "失敗".red(), at.dimmed()),
                }
            }
            None => "未適用".dimmed().to_string(),
        };

        println!(
            "  {}. {:<22} {}",
            descriptor.ordinal,
            descriptor.name.cyan(),
            status
        );
        println!("     {} {}", "tags:".dimmed(), descriptor.tags.join(", "));
        if let Some(record) = ledger.record_of(descriptor.id) {
            if let Some(message) = &record.message {
                println!("     {} {}", "error:".dimmed(), message.red());
            }
        }
    }

    println!();
    println!(
        "{}",
        "ヒント: tier deploy --only <ステージ名|タグ> で一部のステージだけを実行できます".dimmed()
    );
    Ok(())
}
