use splitlink_core::{Config, Paths};

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!("splitlink status");
    println!("================");
    println!();

    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_exists { "✓" } else { "✗ (using defaults)" }
    );

    let state_dir = paths.state_dir();
    let saved_peers = match std::fs::read_dir(&state_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .count(),
        Err(_) => 0,
    };
    println!(
        "State:     {} ({} saved peer{})",
        state_dir.display(),
        saved_peers,
        if saved_peers == 1 { "" } else { "s" }
    );
    println!();

    let config = Config::load_or_default(&paths)?;
    let protocol = &config.protocol;
    println!("Protocol:");
    println!("  key prefix       {}", protocol.key_prefix);
    println!("  pair max age     {} ms", protocol.pair_max_age_ms);
    println!("  settle delay     {} ms", protocol.settle_delay_ms);
    println!("  interest grace   {} ms", protocol.interest_grace_ms);
    println!();

    let toggles = &config.notifications;
    let flag = |on: bool| if on { "on" } else { "off" };
    println!("Notifications:");
    println!("  on join          {}", flag(toggles.notify_on_join));
    println!("  on disconnect    {}", flag(toggles.notify_on_disconnect));
    println!("  other groups     {}", flag(toggles.notify_other_groups));

    if !config_exists {
        println!();
        println!("Run `splitlink config init` to write a config file.");
    }
    Ok(())
}
