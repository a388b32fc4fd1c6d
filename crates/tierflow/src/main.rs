mod commands;
mod docker;
mod progress;
mod utils;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tier")]
#[command(about = "3層アプリを、順番どおりに、何度でも。", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// パイプラインを実行してデプロイ
    Deploy {
        /// 実行するステージ名またはタグ（カンマ区切り・複数指定可）
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,
        /// 除外するステージ名またはタグ（カンマ区切り・複数指定可）
        #[arg(long, value_delimiter = ',')]
        skip: Vec<String>,
        /// 変更内容を表示するだけで適用しない
        #[arg(long, env = "TIER_DRY_RUN")]
        dry_run: bool,
    },
    /// 全ステージの変更内容を表示（deploy --dry-run と同じ）
    Plan,
    /// デプロイ済みの状態を検証
    Verify,
    /// ステージ一覧と適用状況を表示
    Stages,
    /// 設定ファイルを検証
    Validate,
    /// シークレットを管理
    #[command(subcommand)]
    Secret(SecretCommands),
    /// バージョン情報を表示
    Version,
}

#[derive(Subcommand)]
enum SecretCommands {
    /// Vaultの鍵を生成（~/.config/tierflow/vault.key）
    Keygen {
        /// 既存の鍵を上書きする
        #[arg(long)]
        force: bool,
    },
    /// シークレットを登録（同名は上書き）
    Set {
        /// シークレット名（vault://<name> で参照）
        name: String,
        /// 値
        value: String,
    },
    /// シークレットの値を表示
    Get {
        /// シークレット名
        name: String,
    },
    /// 登録済みのシークレット名を表示
    List,
    /// シークレットを削除
    Remove {
        /// シークレット名
        name: String,
    },
}

/// Ctrl-Cでキャンセルを要求する（2回目は即時終了）
fn install_interrupt_handler() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!();
        eprintln!(
            "{}",
            "⚠ 中断を受け付けました。実行中の処理が終わり次第停止します（もう一度で強制終了）"
                .yellow()
        );
        token.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ユーザー向けの出力はstdout、ログはstderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Version => {
            println!("tierflow {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Validate => {
            commands::validate::handle()?;
        }
        Commands::Secret(secret_cmd) => match secret_cmd {
            SecretCommands::Keygen { force } => commands::secret::keygen(force)?,
            SecretCommands::Set { name, value } => commands::secret::set(&name, &value)?,
            SecretCommands::Get { name } => commands::secret::get(&name)?,
            SecretCommands::List => commands::secret::list()?,
            SecretCommands::Remove { name } => commands::secret::remove(&name)?,
        },
        Commands::Stages => {
            let project = utils::load_project()?;
            commands::stages::handle(&project).await?;
        }
        Commands::Verify => {
            let project = utils::load_project()?;
            commands::verify::handle(&project).await?;
        }
        Commands::Plan => {
            let project = utils::load_project()?;
            let cancel = install_interrupt_handler();
            commands::plan::handle(&project, cancel).await?;
        }
        Commands::Deploy {
            only,
            skip,
            dry_run,
        } => {
            let project = utils::load_project()?;
            let cancel = install_interrupt_handler();
            commands::deploy::handle(&project, only, skip, dry_run, cancel).await?;
        }
    }

    Ok(())
}
