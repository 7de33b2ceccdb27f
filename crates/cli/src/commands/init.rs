//! `ragdesk init`: write a default config file.

use std::path::Path;

use ragdesk_config::AppConfig;

pub fn run(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        println!("  Config already exists at {}", path.display());
        println!("  Use --force to overwrite it.");
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;

    println!("  Wrote default config to {}", path.display());
    println!("  Set GOOGLE_API_KEY (or completion.api_key) before running `ragdesk serve`.");
    Ok(())
}
