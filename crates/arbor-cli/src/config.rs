//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "ARBOR_CONFIG_PATH";

/// Configuration for arbor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the conversation backend
    pub base_url: Option<String>,
    /// Model requested for new turns
    pub model: Option<String>,
    /// Conversation opened at startup
    pub conversation: Option<String>,
    /// Print reasoning steps and tool calls as they stream
    pub show_reasoning: Option<bool>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("arbor")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from a file, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Self::default()
            }),
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save config to a file
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            base_url: Some("http://localhost:8080/api".to_string()),
            model: None,
            conversation: None,
            show_reasoning: Some(true),
        };

        default_config.save_to(&path)?;
        Ok(path)
    }

    /// Whether reasoning steps should be printed
    pub fn show_reasoning(&self) -> bool {
        self.show_reasoning.unwrap_or(true)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# arbor configuration file
# Place at ~/.config/arbor/config.toml (Linux/Mac) or %APPDATA%\arbor\config.toml (Windows)
# or point ARBOR_CONFIG_PATH at another file

# Conversation backend (ARBOR_BASE_URL is used when unset)
base_url = "http://localhost:8080/api"

# Model requested for new turns (server default when unset)
# model = "default"

# Conversation to open at startup
# conversation = "..."

# Print reasoning steps and tool calls while a reply streams
show_reasoning = true
"#
}
