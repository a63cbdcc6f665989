//! Credential selection host.
//!
//! The session manager only sees [`KeySelector`]; when no selector is
//! installed it skips the gate entirely.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Local file the console runner keeps the selected key in, so the choice
/// survives restarts.
pub const KEY_FILE_PATH: &str = "studio_api_key.txt";

#[async_trait]
pub trait KeySelector: Send + Sync {
    async fn has_selected_key(&self) -> bool;

    /// Let the user pick a key. After this resolves successfully,
    /// `Config::refresh_credentials` must be able to see it.
    async fn open_select_key(&self) -> Result<(), String>;
}

/// Read the stored key, if any.
pub fn read_key_file(path: &str) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|content| content.trim().to_string())
        .filter(|key| !key.is_empty())
}

/// Asks for a key on stdin and stores it in [`KEY_FILE_PATH`].
pub struct PromptKeySelector {
    path: String,
}

impl PromptKeySelector {
    pub fn new() -> Self {
        Self::with_path(KEY_FILE_PATH)
    }

    pub fn with_path(path: &str) -> Self {
        Self { path: path.to_string() }
    }
}

impl Default for PromptKeySelector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeySelector for PromptKeySelector {
    async fn has_selected_key(&self) -> bool {
        crate::config::env_api_key().is_some() || read_key_file(&self.path).is_some()
    }

    async fn open_select_key(&self) -> Result<(), String> {
        println!("Paste an API key for the live session and press Enter:");
        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| format!("failed to read key: {}", e))?;
        let key = line.trim();
        if key.is_empty() {
            return Err("no key entered".to_string());
        }
        tokio::fs::write(&self.path, key)
            .await
            .map_err(|e| format!("failed to save key to {}: {}", self.path, e))?;
        log::info!("Saved API key to {}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_file_is_trimmed_and_empty_is_none() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("studio_key_{}.txt", uuid::Uuid::new_v4()));
        let path = path.to_str().unwrap();

        assert_eq!(read_key_file(path), None);
        std::fs::write(path, "  secret\n").unwrap();
        assert_eq!(read_key_file(path).as_deref(), Some("secret"));
        std::fs::write(path, "   ").unwrap();
        assert_eq!(read_key_file(path), None);
        let _ = std::fs::remove_file(path);
    }
}
