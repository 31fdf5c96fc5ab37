use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::multipart::{Form, Part};
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::config::Config;
use crate::intake::{OfferedFile, ValidationError};

/// Error code the service uses when an image carries no hidden message.
pub const NO_MESSAGE_CODE: &str = "NO_MESSAGE";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("could not read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path:?} changed since it was chosen ({expected} -> {actual} bytes)")]
    Changed {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server error {status}: {message}")]
    Server {
        status: u16,
        code: Option<String>,
        message: String,
    },
}

impl ApiError {
    /// Short machine-readable tag.
    pub fn code(&self) -> String {
        match self {
            ApiError::Read { .. } => "READ_FAILED".to_string(),
            ApiError::Changed { .. } => "FILE_CHANGED".to_string(),
            ApiError::Invalid(ValidationError::TooLarge { .. }) => "FILE_TOO_LARGE".to_string(),
            ApiError::Invalid(ValidationError::InvalidType(_)) => "INVALID_FILE".to_string(),
            ApiError::Transport(e) if e.is_timeout() => "TIMEOUT".to_string(),
            ApiError::Transport(_) => "TRANSPORT".to_string(),
            ApiError::Server { code: Some(code), .. } => code.clone(),
            ApiError::Server { status, .. } => format!("HTTP_{status}"),
        }
    }

    /// The one line shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Read { path, .. } => format!("Could not read {}", path.display()),
            ApiError::Changed { path, .. } => {
                format!("{} changed since it was chosen, choose it again", path.display())
            }
            ApiError::Invalid(e) => e.to_string(),
            ApiError::Transport(e) if e.is_timeout() => {
                "The steganography service did not answer in time".to_string()
            }
            ApiError::Transport(_) => "Could not reach the steganography service".to_string(),
            ApiError::Server { message, .. } => message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub environment: Option<String>,
    /// A number of MiB, or `"N/A"` when the server can't measure it.
    #[serde(default)]
    pub memory_usage_mb: Option<serde_json::Value>,
}

#[async_trait]
pub trait StegoApi: Send + Sync {
    /// Hide `message` inside the image, returning the modified image bytes.
    async fn hide(&self, file: &OfferedFile, message: &str) -> Result<Vec<u8>, ApiError>;

    /// Reveal the message hidden in the image; `None` when there is none.
    async fn extract(&self, file: &OfferedFile) -> Result<Option<String>, ApiError>;

    async fn health(&self) -> Result<HealthStatus, ApiError>;
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractBody {
    message: Option<String>,
    text: Option<String>,
    error: Option<String>,
    code: Option<String>,
}

/// HTTP implementation backed by `reqwest`.
pub struct HttpStegoApi {
    http: Client,
    encode_url: String,
    decode_url: String,
    health_url: String,
    message_field: String,
    requested_with: Option<String>,
    max_file_size: u64,
}

impl HttpStegoApi {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            encode_url: config.encode_url(),
            decode_url: config.decode_url(),
            health_url: config.health_url(),
            message_field: config.message_field.clone(),
            requested_with: config.requested_with.clone(),
            max_file_size: config.max_file_size,
        })
    }

    async fn image_part(&self, file: &OfferedFile) -> Result<Part, ApiError> {
        let bytes = file.read().await.map_err(|source| ApiError::Read {
            path: file.path.clone(),
            source,
        })?;
        // The file may have been rewritten after it was validated.
        let actual = bytes.len() as u64;
        if actual > self.max_file_size {
            return Err(ValidationError::TooLarge {
                size: actual,
                max: self.max_file_size,
            }
            .into());
        }
        if actual != file.byte_size {
            return Err(ApiError::Changed {
                path: file.path.clone(),
                expected: file.byte_size,
                actual,
            });
        }
        Ok(Part::bytes(bytes)
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)?)
    }

    async fn post(&self, url: &str, form: Form) -> Result<Response, ApiError> {
        let mut request = self
            .http
            .post(url)
            .header(header::ACCEPT, "application/json")
            .multipart(form);
        if let Some(value) = &self.requested_with {
            request = request.header("X-Requested-With", value);
        }

        let response = request.send().await?;
        debug!("POST {} -> {}", url, response.status());
        Ok(response)
    }
}

#[async_trait]
impl StegoApi for HttpStegoApi {
    async fn hide(&self, file: &OfferedFile, message: &str) -> Result<Vec<u8>, ApiError> {
        info!("hide: uploading {} ({} bytes)", file.name, file.byte_size);
        let form = Form::new()
            .part("image", self.image_part(file).await?)
            .text(self.message_field.clone(), message.to_string());

        let response = self.post(&self.encode_url, form).await?;
        let status = response.status();
        let is_json = is_json(&response);
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(server_error(status, &body, "Failed to hide the message"));
        }
        // A JSON reply to an image upload can only be an error report.
        if is_json {
            let parsed = serde_json::from_slice::<ErrorBody>(&body).unwrap_or_default();
            if let Some(message) = parsed.error {
                return Err(ApiError::Server {
                    status: status.as_u16(),
                    code: parsed.code,
                    message,
                });
            }
        }
        Ok(body.to_vec())
    }

    async fn extract(&self, file: &OfferedFile) -> Result<Option<String>, ApiError> {
        info!("extract: uploading {} ({} bytes)", file.name, file.byte_size);
        let form = Form::new().part("image", self.image_part(file).await?);

        let response = self.post(&self.decode_url, form).await?;
        let status = response.status();
        let body = response.bytes().await?;

        parse_extract(status, &body)
    }

    async fn health(&self) -> Result<HealthStatus, ApiError> {
        let response = self
            .http
            .get(&self.health_url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(server_error(status, &body, "Health check failed"));
        }
        serde_json::from_slice(&body).map_err(|e| ApiError::Server {
            status: status.as_u16(),
            code: None,
            message: format!("Unexpected health response: {e}"),
        })
    }
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

/// Build a server error from a failure body, falling back to `fallback`
/// when the body has no usable `error` field.
fn server_error(status: StatusCode, body: &[u8], fallback: &str) -> ApiError {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_else(|e| {
        warn!("Unparseable error body ({status}): {e}");
        ErrorBody::default()
    });
    ApiError::Server {
        status: status.as_u16(),
        code: parsed.code,
        message: parsed
            .error
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| fallback.to_string()),
    }
}

fn parse_extract(status: StatusCode, body: &[u8]) -> Result<Option<String>, ApiError> {
    if !status.is_success() {
        return match server_error(status, body, "Failed to extract the message") {
            ApiError::Server { code: Some(code), .. } if code == NO_MESSAGE_CODE => Ok(None),
            err => Err(err),
        };
    }

    let parsed: ExtractBody = serde_json::from_slice(body).map_err(|e| ApiError::Server {
        status: status.as_u16(),
        code: None,
        message: format!("Unexpected response from the service: {e}"),
    })?;
    if let Some(message) = parsed.error {
        return Err(ApiError::Server {
            status: status.as_u16(),
            code: parsed.code,
            message,
        });
    }

    Ok(parsed
        .message
        .or(parsed.text)
        .filter(|text| !text.is_empty()))
}
