//! Vault configuration.
//!
//! Embedded as the `[vault]` table of the device configuration file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use ons_core::DEFAULT_CHUNK_SIZE;

/// Vault sync settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Vault root directory (default: ./vault).
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Extensions sent whole instead of chunked, lowercase, no dot.
    #[serde(default = "default_text_extensions")]
    pub text_extensions: Vec<String>,
    /// Encoded characters per binary chunk (default: 40 KiB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Send a `check` as soon as the data channel opens (default: false).
    #[serde(default)]
    pub initiate_check: bool,
}

fn default_root() -> PathBuf {
    PathBuf::from("./vault")
}

fn default_text_extensions() -> Vec<String> {
    [
        "md", "txt", "json", "csv", "yml", "yaml", "toml", "html", "css", "js", "ts", "xml",
        "canvas",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            text_extensions: default_text_extensions(),
            chunk_size: default_chunk_size(),
            initiate_check: false,
        }
    }
}

impl VaultConfig {
    /// Config rooted at `root` with every other field defaulted.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Whether `name` is sent whole as text.
    pub fn is_text(&self, name: &str) -> bool {
        let Some((_, ext)) = name.rsplit_once('.') else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.text_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
    }
}
