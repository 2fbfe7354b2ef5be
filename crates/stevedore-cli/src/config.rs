use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_STORE: &str = "~/.local/share/stevedore";

/// Settings read from `config.toml`. Command-line flags take precedence.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    pub store: Option<String>,
    pub quiet: Option<bool>,
}

impl CliConfig {
    /// Load the config from the default location. A missing file is not an error.
    pub fn load_default() -> Result<Self, String> {
        match default_config_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(format!("failed to read config {}: {e}", path.display())),
        };
        toml::from_str(&content)
            .map_err(|e| format!("invalid config {}: {e}", path.display()))
    }

    /// The store root: flag, then config file, then the built-in default.
    pub fn store_path(&self, flag: Option<&str>) -> PathBuf {
        let raw = flag
            .or(self.store.as_deref())
            .unwrap_or(DEFAULT_STORE);
        expand_tilde(raw)
    }

    pub fn quiet(&self, flag: bool) -> bool {
        flag || self.quiet.unwrap_or(false)
    }
}

/// `$XDG_CONFIG_HOME/stevedore/config.toml`, else `~/.config/stevedore/config.toml`.
fn default_config_path() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg).join("stevedore/config.toml"));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/stevedore/config.toml"))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
