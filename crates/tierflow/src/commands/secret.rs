use crate::utils;
use colored::Colorize;
use tierflow_core::VaultKey;
use tierflow_core::vault::VAULT_KEY_ENV;

/// Vaultの鍵を生成して設定ディレクトリに保存
pub fn keygen(force: bool) -> anyhow::Result<()> {
    let path = tierflow_config::vault_key_path()?;
    if path.exists() && !force {
        anyhow::bail!(
            "鍵ファイルは既に存在します: {}\n上書きすると既存のシークレットを復号できなくなります。上書きする場合は --force を指定してください",
            path.display()
        );
    }

    let key = VaultKey::generate();
    key.write_to(&path)?;

    println!("{}", "✓ Vaultの鍵を生成しました".green().bold());
    println!("  鍵ファイル: {}", path.display().to_string().cyan());
    println!();
    println!(
        "{}",
        format!(
            "ヒント: CIなどでは鍵ファイルの代わりに {} 環境変数に同じ内容を設定できます",
            VAULT_KEY_ENV
        )
        .dimmed()
    );
    Ok(())
}

pub fn set(name: &str, value: &str) -> anyhow::Result<()> {
    let (_, root) = utils::locate_project()?;
    let mut vault = utils::require_vault(&root)?;
    let replaced = vault.contains(name);
    vault.set(name, value)?;
    vault.save()?;

    let verb = if replaced { "更新" } else { "登録" };
    println!(
        "{} シークレット '{}' を{}しました",
        "✓".green().bold(),
        name.cyan(),
        verb
    );
    println!("  参照: {}", format!("vault://{}", name).cyan());
    Ok(())
}

pub fn get(name: &str) -> anyhow::Result<()> {
    let (_, root) = utils::locate_project()?;
    let vault = utils::require_vault(&root)?;
    println!("{}", vault.get(name)?);
    Ok(())
}

pub fn list() -> anyhow::Result<()> {
    let (_, root) = utils::locate_project()?;
    let vault = utils::require_vault(&root)?;
    let names = vault.names();

    if names.is_empty() {
        println!("{}", "登録済みのシークレットはありません".dimmed());
        return Ok(());
    }
    println!("シークレット: {}個", names.len());
    for name in names {
        println!("  - {}", name.cyan());
    }
    Ok(())
}

pub fn remove(name: &str) -> anyhow::Result<()> {
    let (_, root) = utils::locate_project()?;
    let mut vault = utils::require_vault(&root)?;
    if !vault.remove(name) {
        anyhow::bail!("シークレット '{}' は登録されていません", name);
    }
    vault.save()?;
    println!(
        "{} シークレット '{}' を削除しました",
        "✓".green().bold(),
        name.cyan()
    );
    Ok(())
}
