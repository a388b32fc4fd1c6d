use crate::utils;
use colored::Colorize;
use tierflow_core::vault::reference_name;
use tierflow_core::{Deployment, PackageRole, ServiceRole};

pub fn handle() -> anyhow::Result<()> {
    println!("{}", "設定を検証中...".blue());

    let project = match utils::load_project() {
        Ok(project) => project,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ 設定ファイルにエラーがあります".red().bold());
            eprintln!();
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    println!(
        "設定ファイル: {}",
        project.deploy_file.display().to_string().cyan()
    );
    println!("{}", "✓ 設定ファイルは正常です！".green().bold());
    println!();
    print_summary(&project.deployment);

    check_secret_references(&project)?;
    Ok(())
}

fn print_summary(deployment: &Deployment) {
    println!("サマリー:");
    println!("  プロジェクト: {}", deployment.name.cyan());

    let packages: Vec<String> = deployment
        .host
        .packages
        .iter()
        .map(|p| match p.role {
            PackageRole::Runtime => p.name.clone(),
            PackageRole::Vcs => format!("{} (vcs)", p.name),
        })
        .collect();
    println!(
        "  ホストパッケージ: {}{}",
        packages.join(", "),
        if deployment.host.sudo { " (sudo)" } else { "" }
    );

    match &deployment.source {
        Some(source) => println!(
            "  ソース: {} ({}) → {}",
            source.repository.cyan(),
            source.branch,
            source.dest.display()
        ),
        None => println!("  ソース: {}", "(なし)".dimmed()),
    }

    println!(
        "  ネットワーク: {} ({})",
        deployment.network.name.cyan(),
        deployment.network.driver
    );
    if !deployment.volumes.is_empty() {
        let volumes: Vec<&str> = deployment.volumes.iter().map(|v| v.name.as_str()).collect();
        println!("  ボリューム: {}", volumes.join(", "));
    }

    println!("  サービス: {}個", deployment.services.len());
    for role in ServiceRole::ALL {
        let Ok((name, service)) = deployment.service_by_role(role) else {
            continue;
        };
        let image = match (&service.image, &service.build) {
            (_, Some(_)) => format!(
                "build → {}",
                deployment.image_ref(name).unwrap_or_default()
            ),
            (Some(image), None) => image.clone(),
            (None, None) => "(未設定)".to_string(),
        };
        let ports: Vec<String> = service
            .ports
            .iter()
            .map(|p| format!("{}:{}", p.host, p.container))
            .collect();
        println!(
            "    - {} [{}] {} {}",
            name.cyan(),
            role,
            image,
            if ports.is_empty() {
                String::new()
            } else {
                format!("ports {}", ports.join(", ")).dimmed().to_string()
            }
        );
        if let Some((endpoint, policy)) = service.readiness_target() {
            println!(
                "      readiness: {} (timeout {}s)",
                endpoint.address(),
                policy.timeout.as_secs()
            );
        }
    }
}

/// vault:// 参照がVaultに登録されているか確認（値は復号しない）
fn check_secret_references(project: &utils::Project) -> anyhow::Result<()> {
    let mut references: Vec<(&str, &str, &str)> = Vec::new();
    for (service_name, service) in &project.deployment.services {
        for (key, value) in &service.environment {
            if let Some(name) = reference_name(value) {
                references.push((service_name.as_str(), key.as_str(), name));
            }
        }
    }
    if references.is_empty() {
        return Ok(());
    }
    references.sort();

    println!();
    println!("  シークレット参照: {}個", references.len());
    let Some(vault) = utils::open_vault(&project.root)? else {
        println!(
            "  {} Vaultの鍵が無いため登録状況を確認できません（tier secret keygen）",
            "⚠".yellow()
        );
        return Ok(());
    };

    for (service, key, name) in references {
        if vault.contains(name) {
            println!("    {} {}.{} → vault://{}", "✓".green(), service, key, name);
        } else {
            println!(
                "    {} {}.{} → vault://{} {}",
                "⚠".yellow(),
                service,
                key,
                name,
                "(未登録)".yellow()
            );
        }
    }
    Ok(())
}
