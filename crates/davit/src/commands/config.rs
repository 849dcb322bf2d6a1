use anyhow::Context;
use colored::Colorize;

pub fn handle_path() -> anyhow::Result<()> {
    let path = davit_config::find_config_file()?;
    println!("{}", path.display());
    Ok(())
}

pub fn handle_show() -> anyhow::Result<()> {
    let path = davit_config::find_config_file()?;
    let settings = davit_config::load_from(&path)?;

    println!("{} {}", "設定ファイル:".bold(), path.display().to_string().cyan());
    println!();
    print!(
        "{}",
        settings
            .to_toml()
            .context("設定を TOML として出力できません")?
    );

    println!();
    println!("{}", "環境:".bold());
    for env in settings.environments() {
        let marker = if env.protected {
            " [protected]".red().to_string()
        } else {
            String::new()
        };
        println!(
            "  • {}{} → {} ({})",
            env.name.cyan(),
            marker,
            env.yaml_root_dir.display(),
            env.cluster_context
        );
    }
    Ok(())
}
