use colored::Colorize;
use std::sync::Arc;
use tierflow_container::DockerRuntime;
use tierflow_pipeline::ContainerRuntime;

fn print_connection_hint(cause: &dyn std::fmt::Display) {
    eprintln!();
    eprintln!("{}", "✗ Docker接続エラー".red().bold());
    eprintln!();
    eprintln!("{}", "原因:".yellow());
    eprintln!("  {}", cause);
    eprintln!();
    eprintln!("{}", "解決方法:".yellow());
    eprintln!("  • Dockerが起動しているか確認してください");
    eprintln!("  • 未インストールの場合は tier deploy --only bootstrap でインストールできます");
    eprintln!("  • docker ps コマンドが正常に動作するか確認してください");
}

/// Dockerクライアントを用意する
///
/// `ping` がfalseなら疎通確認をしない（ホスト準備ステージでDockerを
/// インストールする前でもパイプラインを組み立てられるように）
pub async fn init_runtime_with_error_handling(ping: bool) -> anyhow::Result<Arc<DockerRuntime>> {
    let runtime = match DockerRuntime::connect() {
        Ok(runtime) => runtime,
        Err(e) => {
            print_connection_hint(&e);
            return Err(anyhow::anyhow!("Docker接続に失敗しました"));
        }
    };

    if ping {
        if let Err(e) = runtime.ping().await {
            print_connection_hint(&e);
            return Err(anyhow::anyhow!("Docker接続に失敗しました"));
        }
    }

    Ok(Arc::new(runtime))
}
