use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use log::{debug, warn};
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::state::Mode;
use crate::utils::mime_from_path;

pub const ALLOWED_IMAGE_TYPES: &[&str] = &["image/png", "image/jpeg", "image/bmp"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("please choose a valid image (PNG, JPG or BMP), got {0}")]
    InvalidType(String),

    #[error("file is too large ({size} bytes), the maximum is {}", size_limit(.max))]
    TooLarge { size: u64, max: u64 },
}

fn size_limit(max: &u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if *max >= MIB && max % MIB == 0 {
        format!("{} MiB", max / MIB)
    } else {
        format!("{max} bytes")
    }
}

/// Handle to a file the user offered. Holds metadata only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferedFile {
    pub path: PathBuf,
    pub name: String,
    pub mime_type: String,
    pub byte_size: u64,
}

impl OfferedFile {
    /// Stat a file on disk and guess its type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let meta = tokio::fs::metadata(&path).await?;
        if !meta.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(Self {
            name: file_name(&path),
            mime_type: mime_from_path(&path).to_string(),
            byte_size: meta.len(),
            path,
        })
    }

    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}

/// A file that passed validation and is bound to one mode.
#[derive(Debug, Clone)]
pub struct FileSelection {
    pub file: OfferedFile,
    preview: Arc<OnceCell<Option<String>>>,
}

impl FileSelection {
    pub fn mime_type(&self) -> &str {
        &self.file.mime_type
    }

    pub fn byte_size(&self) -> u64 {
        self.file.byte_size
    }

    /// Data URI of the file contents, computed on first call.
    ///
    /// A read failure only costs the preview; the selection stays usable.
    pub async fn preview_data(&self) -> Option<&str> {
        self.preview
            .get_or_init(|| async {
                match preview_data_uri(&self.file).await {
                    Ok(uri) => Some(uri),
                    Err(e) => {
                        warn!("No preview for {:?}: {}", self.file.path, e);
                        None
                    }
                }
            })
            .await
            .as_deref()
    }
}

async fn preview_data_uri(file: &OfferedFile) -> std::io::Result<String> {
    let bytes = file.read().await?;
    Ok(format!("data:{};base64,{}", file.mime_type, BASE64.encode(bytes)))
}

#[derive(Debug, Clone)]
pub struct FileIntake {
    max_file_size: u64,
}

impl FileIntake {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    pub fn validate(&self, file: OfferedFile, mode: Mode) -> Result<FileSelection, ValidationError> {
        if !ALLOWED_IMAGE_TYPES.contains(&file.mime_type.as_str()) {
            debug!("{mode}: rejected {:?} ({})", file.path, file.mime_type);
            return Err(ValidationError::InvalidType(file.mime_type));
        }
        if file.byte_size > self.max_file_size {
            debug!("{mode}: rejected {:?} ({} bytes)", file.path, file.byte_size);
            return Err(ValidationError::TooLarge {
                size: file.byte_size,
                max: self.max_file_size,
            });
        }

        debug!("{mode}: accepted {:?}", file.path);
        Ok(FileSelection {
            file,
            preview: Arc::new(OnceCell::new()),
        })
    }
}
