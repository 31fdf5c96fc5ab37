use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;

use crate::utils::download_path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Revealed {
    Message(String),
    NothingHidden,
}

#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Store an encoded image and return where it ended up.
    async fn save_image(&self, original_name: &str, bytes: &[u8]) -> Result<PathBuf>;

    fn show_revealed(&self, text: Option<&str>);

    fn clear_revealed(&self);

    fn revealed(&self) -> Option<Revealed>;
}

/// Writes downloads into a directory and prints revealed text.
pub struct DiskOutput {
    dir: PathBuf,
    echo: bool,
    revealed: Mutex<Option<Revealed>>,
}

impl DiskOutput {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            echo: true,
            revealed: Mutex::new(None),
        }
    }

    /// Keep revealed text in memory only.
    #[cfg(test)]
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }

    fn set_revealed(&self, value: Option<Revealed>) {
        *self.revealed.lock().unwrap_or_else(|e| e.into_inner()) = value;
    }
}

#[async_trait]
impl OutputSink for DiskOutput {
    async fn save_image(&self, original_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {:?}", self.dir))?;
        let path = download_path(&self.dir, original_name);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {:?}", path))?;
        info!("Saved {} bytes to {:?}", bytes.len(), path);
        Ok(path)
    }

    fn show_revealed(&self, text: Option<&str>) {
        let revealed = match text {
            Some(text) => Revealed::Message(text.to_string()),
            None => Revealed::NothingHidden,
        };
        if self.echo {
            match &revealed {
                Revealed::Message(text) => println!("{text}"),
                Revealed::NothingHidden => println!("(no hidden message)"),
            }
        }
        self.set_revealed(Some(revealed));
    }

    fn clear_revealed(&self) {
        self.set_revealed(None);
    }

    fn revealed(&self) -> Option<Revealed> {
        self.revealed.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
