/*!
 * Configuration types for orbit-adls
 */

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::CredentialSettings;
use crate::codec::{Codec, JsonCodec, LineCodec};
use crate::core::{RetryLimit, RetryPolicy, CID_FIELD, CID_PLACEHOLDER};
use crate::error::{AdlsError, Result};
use crate::template::Template;
use secrecy::{ExposeSecret, SecretString};

/// Record encoder selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// One JSON object per event
    #[default]
    Json,

    /// `line_format` rendered per event
    Line,
}

/// Sink configuration
///
/// Keys match the TOML file. Required keys default to empty and are
/// rejected by [`validate`](SinkConfig::validate).
#[derive(Deserialize)]
pub struct SinkConfig {
    /// Store account FQDN, e.g. `myaccount.azuredatalakestore.net`
    #[serde(default)]
    pub adls_fqdn: String,

    /// OAuth2 token endpoint
    #[serde(default)]
    pub adls_token_endpoint: String,

    #[serde(default)]
    pub adls_client_id: String,

    #[serde(default = "empty_secret", deserialize_with = "deserialize_secret")]
    pub adls_client_key: SecretString,

    /// Destination path template
    #[serde(default)]
    pub path: String,

    /// Path probed after each token acquisition
    #[serde(default = "default_test_path")]
    pub test_path: String,

    #[serde(default = "default_line_separator")]
    pub line_separator: String,

    /// Permission of created objects, written as octal digits (755)
    #[serde(default = "default_permission")]
    pub created_files_permission: u32,

    /// Seconds before token expiry at which renewal is due
    #[serde(default = "default_security_margin")]
    pub adls_token_expire_security_margin: f64,

    /// Route each concurrent delivery call into its own object via `%{[@metadata][cid]}`
    #[serde(default = "default_true")]
    pub single_file_per_thread: bool,

    /// Backoff step in seconds (fractions allowed)
    #[serde(default = "default_retry_interval")]
    pub retry_interval: f64,

    /// Backoff cap in seconds
    #[serde(default = "default_max_retry_interval")]
    pub max_retry_interval: f64,

    /// Retries after the first failed attempt (-1 = unlimited)
    #[serde(default = "default_retry_times")]
    pub retry_times: i64,

    #[serde(default)]
    pub exit_if_retries_exceeded: bool,

    #[serde(default)]
    pub codec: CodecKind,

    /// Template used by the line codec
    #[serde(default = "default_line_format")]
    pub line_format: String,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stderr)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            adls_fqdn: String::new(),
            adls_token_endpoint: String::new(),
            adls_client_id: String::new(),
            adls_client_key: empty_secret(),
            path: String::new(),
            test_path: default_test_path(),
            line_separator: default_line_separator(),
            created_files_permission: default_permission(),
            adls_token_expire_security_margin: default_security_margin(),
            single_file_per_thread: true,
            retry_interval: default_retry_interval(),
            max_retry_interval: default_max_retry_interval(),
            retry_times: default_retry_times(),
            exit_if_retries_exceeded: false,
            codec: CodecKind::default(),
            line_format: default_line_format(),
            log_level: LogLevel::default(),
            log_file: None,
            verbose: false,
        }
    }
}

impl fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkConfig")
            .field("adls_fqdn", &self.adls_fqdn)
            .field("adls_token_endpoint", &self.adls_token_endpoint)
            .field("adls_client_id", &self.adls_client_id)
            .field("adls_client_key", &"[REDACTED]")
            .field("path", &self.path)
            .field("test_path", &self.test_path)
            .field("line_separator", &self.line_separator)
            .field("created_files_permission", &self.created_files_permission)
            .field(
                "adls_token_expire_security_margin",
                &self.adls_token_expire_security_margin,
            )
            .field("single_file_per_thread", &self.single_file_per_thread)
            .field("retry_interval", &self.retry_interval)
            .field("max_retry_interval", &self.max_retry_interval)
            .field("retry_times", &self.retry_times)
            .field("exit_if_retries_exceeded", &self.exit_if_retries_exceeded)
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_test_path() -> String {
    "testfile".to_string()
}

fn default_line_separator() -> String {
    "\n".to_string()
}

fn default_permission() -> u32 {
    755
}

fn default_security_margin() -> f64 {
    300.0
}

fn default_retry_interval() -> f64 {
    1.0
}

fn default_max_retry_interval() -> f64 {
    10.0
}

fn default_retry_times() -> i64 {
    3
}

fn default_line_format() -> String {
    LineCodec::DEFAULT_FORMAT.to_string()
}

fn empty_secret() -> SecretString {
    SecretString::new(String::new().into_boxed_str())
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    Ok(SecretString::new(value.into_boxed_str()))
}

/// Interpret decimal digits as octal permission bits: 755 -> 0o755
fn octal_digits(value: u32) -> Option<u32> {
    if value > 7777 {
        return None;
    }
    let mut bits = 0;
    let mut place = 1;
    let mut rest = value;
    loop {
        let digit = rest % 10;
        if digit > 7 {
            return None;
        }
        bits += digit * place;
        place *= 8;
        rest /= 10;
        if rest == 0 {
            return Some(bits);
        }
    }
}

/// Validated seconds to a `Duration`; out-of-range values clamp to zero
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl SinkConfig {
    /// Configuration with the required keys set and defaults elsewhere
    pub fn new(
        fqdn: impl Into<String>,
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_key: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            adls_fqdn: fqdn.into(),
            adls_token_endpoint: token_endpoint.into(),
            adls_client_id: client_id.into(),
            adls_client_key: SecretString::new(client_key.into().into_boxed_str()),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AdlsError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Check the configuration before anything touches the network
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("adls_fqdn", self.adls_fqdn.as_str()),
            ("adls_token_endpoint", self.adls_token_endpoint.as_str()),
            ("adls_client_id", self.adls_client_id.as_str()),
            ("adls_client_key", self.adls_client_key.expose_secret()),
            ("path", self.path.as_str()),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(AdlsError::Config(format!("'{}' is required", key)));
            }
        }

        url::Url::parse(&self.adls_token_endpoint).map_err(|e| {
            AdlsError::Config(format!(
                "adls_token_endpoint '{}' is not a valid URL: {}",
                self.adls_token_endpoint, e
            ))
        })?;

        if self.single_file_per_thread && !Template::parse(&self.path).references(CID_FIELD) {
            return Err(AdlsError::Config(format!(
                "single_file_per_thread is enabled but path '{}' does not contain {}",
                self.path, CID_PLACEHOLDER
            )));
        }

        if RetryLimit::from_retry_times(self.retry_times).is_none() {
            return Err(AdlsError::Config(format!(
                "retry_times must be -1 (unlimited) or >= 0, got {}",
                self.retry_times
            )));
        }

        let non_negative = [
            ("retry_interval", self.retry_interval),
            ("max_retry_interval", self.max_retry_interval),
            (
                "adls_token_expire_security_margin",
                self.adls_token_expire_security_margin,
            ),
        ];
        for (key, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(AdlsError::Config(format!(
                    "'{}' must be a finite number >= 0, got {}",
                    key, value
                )));
            }
            if Duration::try_from_secs_f64(value).is_err() {
                return Err(AdlsError::Config(format!(
                    "'{}' is too large, got {}",
                    key, value
                )));
            }
        }

        if self.line_separator.is_empty() {
            return Err(AdlsError::Config("line_separator must not be empty".into()));
        }

        self.permission_bits()?;
        Ok(())
    }

    /// Permission bits for created objects
    pub fn permission_bits(&self) -> Result<u32> {
        octal_digits(self.created_files_permission).ok_or_else(|| {
            AdlsError::Config(format!(
                "created_files_permission must be octal digits (e.g. 755), got {}",
                self.created_files_permission
            ))
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_interval: seconds(self.retry_interval),
            max_retry_interval: seconds(self.max_retry_interval),
            limit: RetryLimit::from_retry_times(self.retry_times)
                .unwrap_or(RetryLimit::Bounded(0)),
            exit_on_exceeded: self.exit_if_retries_exceeded,
        }
    }

    pub fn credential_settings(&self) -> CredentialSettings {
        CredentialSettings {
            fqdn: self.adls_fqdn.clone(),
            token_endpoint: self.adls_token_endpoint.clone(),
            client_id: self.adls_client_id.clone(),
            client_key: SecretString::new(
                self.adls_client_key.expose_secret().to_string().into_boxed_str(),
            ),
            probe_path: self.test_path.clone(),
            security_margin: seconds(self.adls_token_expire_security_margin),
            retry_interval: seconds(self.retry_interval),
            max_retry_interval: seconds(self.max_retry_interval),
        }
    }

    /// Codec selected by `codec`
    pub fn build_codec(&self) -> Arc<dyn Codec> {
        match self.codec {
            CodecKind::Json => Arc::new(JsonCodec),
            CodecKind::Line => Arc::new(LineCodec::new(&self.line_format)),
        }
    }
}
