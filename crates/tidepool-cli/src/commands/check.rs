use std::path::Path;

use anyhow::Context;
use tidepool_core::{PolicyConfig, PolicyFile};

pub fn check(path: &Path, format: &str) -> anyhow::Result<()> {
    let config = load_policy(path)?;
    println!("{}", render(&config, format)?);
    Ok(())
}

fn load_policy(path: &Path) -> anyhow::Result<PolicyConfig> {
    let file = PolicyFile::from_file(path)
        .with_context(|| format!("reading policy {}", path.display()))?;
    let config = file
        .resolve()
        .with_context(|| format!("invalid policy {}", path.display()))?;
    Ok(config)
}

fn render(config: &PolicyConfig, format: &str) -> anyhow::Result<String> {
    let resolved = PolicyFile::from(config);
    match format {
        "json" => Ok(serde_json::to_string_pretty(&resolved)?),
        _ => Ok(format!("✓ policy is valid\n\n{}", toml::to_string(&resolved)?)),
    }
}
