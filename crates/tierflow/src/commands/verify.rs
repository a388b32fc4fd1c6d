use crate::docker;
use crate::utils::{self, Project};
use colored::Colorize;
use tierflow_pipeline::{ReadinessGate, Verifier};

/// デプロイ済みの状態を検証（指摘は警告として表示）
pub async fn handle(project: &Project) -> anyhow::Result<()> {
    utils::print_loaded_config_file(project);
    println!("{}", "デプロイ状態を検証中...".blue());
    println!();

    let runtime = docker::init_runtime_with_error_handling(true).await?;
    let verifier = Verifier::new(runtime, ReadinessGate::tcp());
    let report = verifier.verify(&project.deployment).await;

    for subject in &report.passed {
        println!("  {} {}", "✓".green(), subject);
    }
    for warning in &report.warnings {
        println!(
            "  {} {}: {}",
            "⚠".yellow(),
            warning.subject,
            warning.message.yellow()
        );
    }

    println!();
    if report.is_clean() {
        println!("{}", "✓ すべての確認項目に合格しました".green().bold());
        utils::print_endpoints(&project.deployment);
    } else {
        println!(
            "{}",
            format!("⚠ {}件の警告があります", report.warnings.len())
                .yellow()
                .bold()
        );
    }
    Ok(())
}
