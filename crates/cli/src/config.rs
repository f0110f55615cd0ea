//! Settings discovery for the CLI

use anyhow::{Context, Result};
use obi_core::Settings;
use std::path::{Path, PathBuf};

const SETTINGS_EXTENSIONS: [&str; 3] = ["yaml", "json", "toml"];

/// Settings file to load: the explicit path, else the first existing
/// `~/.config/obi/config.{yaml,json,toml}`
pub fn settings_path(override_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = override_path {
        return Some(path.to_path_buf());
    }

    let dir = dirs_next::home_dir()?.join(".config").join("obi");
    SETTINGS_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("config.{}", ext)))
        .find(|path| path.is_file())
}

/// Load settings, applying the `--namespace` override last
pub fn load_settings(override_path: Option<&Path>, namespace: Option<&str>) -> Result<Settings> {
    let path = settings_path(override_path);
    let mut settings = Settings::load(path.as_deref()).with_context(|| match &path {
        Some(path) => format!("Failed to load settings from {}", path.display()),
        None => "Failed to load settings from environment".to_string(),
    })?;

    if let Some(namespace) = namespace {
        settings.namespace = namespace.to_string();
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_explicit_settings_path_wins() {
        let path = Path::new("/etc/obi/custom.yaml");
        assert_eq!(settings_path(Some(path)), Some(path.to_path_buf()));
    }

    #[test]
    fn test_namespace_override() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "namespace: from-file\nmaster_port: 9000").unwrap();

        let settings = load_settings(Some(file.path()), None).unwrap();
        assert_eq!(settings.namespace, "from-file");
        assert_eq!(settings.master_port, 9000);

        let settings = load_settings(Some(file.path()), Some("from-flag")).unwrap();
        assert_eq!(settings.namespace, "from-flag");
    }
}
