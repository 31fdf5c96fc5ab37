use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

pub const LOCAL_API_URL: &str = "http://127.0.0.1:5000";

pub const DEPLOYED_API_URL: &str = "https://steganografia-api.onrender.com";

pub const DEFAULT_MAX_SIZE_MIB: u64 = 16;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_ENCODE_PATH: &str = "/encode";
pub const DEFAULT_DECODE_PATH: &str = "/decode";
pub const DEFAULT_MESSAGE_FIELD: &str = "message";

/// How long a success/error notice stays on screen.
pub const NOTICE_TTL: Duration = Duration::from_secs(5);

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_url: String,
    pub encode_path: String,
    pub decode_path: String,
    /// Multipart field carrying the message on encode (`message` or `text`).
    pub message_field: String,
    pub max_file_size: u64,
    /// `None` means the request may hang for as long as the transport allows.
    pub timeout: Option<Duration>,
    pub requested_with: Option<String>,
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEPLOYED_API_URL.to_string(),
            encode_path: DEFAULT_ENCODE_PATH.to_string(),
            decode_path: DEFAULT_DECODE_PATH.to_string(),
            message_field: DEFAULT_MESSAGE_FIELD.to_string(),
            max_file_size: DEFAULT_MAX_SIZE_MIB * MIB,
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            requested_with: None,
            output_dir: PathBuf::from("."),
        }
    }
}

/// Overrides collected from the command line. Every field is optional so
/// unset flags fall through to the environment or the defaults.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_url: Option<String>,
    pub local: bool,
    pub max_size_mib: Option<u64>,
    pub encode_path: Option<String>,
    pub decode_path: Option<String>,
    pub message_field: Option<String>,
    pub timeout_secs: Option<u64>,
    pub requested_with: Option<String>,
    pub output_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        let local = lookup("STEGO_LOCAL")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);
        if local {
            config.api_url = LOCAL_API_URL.to_string();
        }
        if let Some(url) = lookup("STEGO_API_URL") {
            config.api_url = url;
        }
        if let Some(mib) = lookup("STEGO_MAX_SIZE_MIB") {
            let mib: u64 = mib
                .trim()
                .parse()
                .with_context(|| format!("STEGO_MAX_SIZE_MIB is not a number: {mib:?}"))?;
            config.max_file_size = mib_to_bytes(mib).context("Invalid STEGO_MAX_SIZE_MIB")?;
        }
        if let Some(secs) = lookup("STEGO_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("STEGO_TIMEOUT_SECS is not a number: {secs:?}"))?;
            config.timeout = timeout_from_secs(secs);
        }
        if let Some(path) = lookup("STEGO_ENCODE_PATH") {
            config.encode_path = path;
        }
        if let Some(path) = lookup("STEGO_DECODE_PATH") {
            config.decode_path = path;
        }
        if let Some(field) = lookup("STEGO_MESSAGE_FIELD") {
            config.message_field = field;
        }
        config.requested_with = lookup("STEGO_REQUESTED_WITH");
        if let Some(dir) = lookup("STEGO_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    pub fn apply_overrides(mut self, overrides: Overrides) -> Result<Self> {
        if overrides.local {
            self.api_url = LOCAL_API_URL.to_string();
        }
        if let Some(url) = overrides.api_url {
            self.api_url = url;
        }
        if let Some(mib) = overrides.max_size_mib {
            self.max_file_size = mib_to_bytes(mib).context("Invalid --max-size-mib")?;
        }
        if let Some(secs) = overrides.timeout_secs {
            self.timeout = timeout_from_secs(secs);
        }
        if let Some(path) = overrides.encode_path {
            self.encode_path = path;
        }
        if let Some(path) = overrides.decode_path {
            self.decode_path = path;
        }
        if let Some(field) = overrides.message_field {
            self.message_field = field;
        }
        if overrides.requested_with.is_some() {
            self.requested_with = overrides.requested_with;
        }
        if let Some(dir) = overrides.output_dir {
            self.output_dir = dir;
        }
        Ok(self)
    }

    pub fn encode_url(&self) -> String {
        join_url(&self.api_url, &self.encode_path)
    }

    pub fn decode_url(&self) -> String {
        join_url(&self.api_url, &self.decode_path)
    }

    pub fn health_url(&self) -> String {
        join_url(&self.api_url, "/health")
    }
}

fn mib_to_bytes(mib: u64) -> Result<u64> {
    mib.checked_mul(MIB)
        .ok_or_else(|| anyhow!("{mib} MiB does not fit in a byte count"))
}

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
