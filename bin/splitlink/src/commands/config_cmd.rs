use splitlink_core::{Config, Paths};
use std::io::Write;

/// Show the effective configuration as pretty-printed JSON.
pub async fn show() -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;

    println!();
    println!("Current configuration");
    println!("  File: {}", paths.config_file().display());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Write the default configuration, asking before overwriting.
pub async fn init(force: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    let path = paths.config_file();

    if path.exists() && !force {
        print!("Config already exists at {}. Overwrite? [y/N] ", path.display());
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    Config::default().save(&path)?;
    std::fs::create_dir_all(paths.state_dir())?;
    println!("✓ Wrote default config: {}", path.display());
    Ok(())
}
