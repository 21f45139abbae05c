//! `blocks init`: write the default config file.

use blocks_config::AppConfig;
use std::path::Path;
use tracing::info;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_path();

    if write_default_config(&config_path)? {
        println!("Created config at: {}", config_path.display());
        println!();
        println!("Next steps:");
        println!("   1. Add your API key to {} (or set OPENAI_API_KEY)", config_path.display());
        println!("   2. Run: blocks serve");
        println!("   3. In another terminal: blocks chat");
    } else {
        println!("Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete it and re-run init.");
    }

    Ok(())
}

/// Write the default config unless a file is already there.
/// Returns whether a file was written.
fn write_default_config(path: &Path) -> std::io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    info!(path = %path.display(), "Default config written");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_once_and_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        assert!(write_default_config(&path).unwrap());
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(AppConfig::load_from(&path).is_ok());

        std::fs::write(&path, "model = \"custom\"\n").unwrap();
        assert!(!write_default_config(&path).unwrap());
        assert_ne!(std::fs::read_to_string(&path).unwrap(), written);
    }
}
