use crate::docker;
use crate::progress::StageProgress;
use crate::utils::{self, Project};
use colored::Colorize;
use std::sync::Arc;
use tierflow_host::{AptPackages, GitCli};
use tierflow_pipeline::{
    ContainerRuntime, Ledger, ReadinessGate, ResourceApplier, RunReport, Sequencer, StageSelector,
    Verifier, acquire_lock, build_stages, stage_descriptors,
};
use tokio_util::sync::CancellationToken;

/// パイプラインを組み立てて実行する
///
/// dry-runではロックを取らず、台帳もディスクに書き込まない
pub async fn execute(
    project: &Project,
    selector: &StageSelector,
    dry_run: bool,
    cancel: CancellationToken,
) -> anyhow::Result<(RunReport, Arc<dyn ContainerRuntime>)> {
    let deployment = &project.deployment;

    // Dockerに触る前にセレクタを解決して、指定ミスを早く知らせる
    let descriptors = stage_descriptors(deployment);
    let selection = selector.resolve(&descriptors)?;
    if selection.is_empty() {
        anyhow::bail!("実行するステージがありません（--only / --skip の指定を確認してください）");
    }

    let lock = if dry_run {
        None
    } else {
        Some(acquire_lock(&project.root).await?)
    };

    let mut ledger = Ledger::load(&project.root).await?;
    if dry_run {
        ledger = ledger.detached();
    }

    let vault = utils::open_vault(&project.root)?.map(Arc::new);
    let runtime: Arc<dyn ContainerRuntime> =
        docker::init_runtime_with_error_handling(false).await?;
    let applier = Arc::new(ResourceApplier::new(
        runtime.clone(),
        Arc::new(GitCli::new()),
        Arc::new(AptPackages::new(deployment.host.sudo)),
    ));

    let stages = build_stages(
        Arc::new(deployment.clone()),
        &project.root,
        applier,
        vault,
    )?;

    let sequencer = Sequencer::new(ReadinessGate::tcp())
        .with_observer(Arc::new(StageProgress::new()))
        .with_cancellation(cancel);
    let report = sequencer.run(&stages, &selection, &mut ledger, dry_run).await;

    if let Some(lock) = lock {
        lock.release().await?;
    }

    Ok((report, runtime))
}

pub async fn handle(
    project: &Project,
    only: Vec<String>,
    skip: Vec<String>,
    dry_run: bool,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    utils::print_loaded_config_file(project);
    if dry_run {
        println!(
            "{}",
            format!("プロジェクト '{}' の変更内容を確認中 (dry-run)...", project.deployment.name)
                .blue()
        );
    } else {
        println!(
            "{}",
            format!("プロジェクト '{}' をデプロイ中...", project.deployment.name).blue()
        );
    }
    println!();

    let selector = StageSelector::new(only, skip);
    let (report, runtime) = execute(project, &selector, dry_run, cancel).await?;

    if !report.is_success() {
        utils::print_failure(&report);
        let stage = report
            .first_failed()
            .map(|(d, _)| d.name.clone())
            .unwrap_or_default();
        anyhow::bail!("ステージ '{}' で失敗しました", stage);
    }

    println!();
    if dry_run {
        let plan = report.plan();
        println!("{} {}", "プラン:".bold(), plan.summary());
        if !plan.has_changes() {
            println!("{}", "✓ 変更はありません".green().bold());
        }
        return Ok(());
    }

    println!("{}", "✓ デプロイが完了しました！".green().bold());

    // 検証の指摘は警告として表示するだけで、結果は変えない
    let verifier = Verifier::new(runtime, ReadinessGate::tcp());
    let verification = verifier.verify(&project.deployment).await;
    if !verification.is_clean() {
        println!();
        println!(
            "{}",
            format!("⚠ 検証で{}件の警告があります", verification.warnings.len()).yellow()
        );
        for warning in &verification.warnings {
            println!("  • {}", warning);
        }
    }

    utils::print_endpoints(&project.deployment);
    Ok(())
}
